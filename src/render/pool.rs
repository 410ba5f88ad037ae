//! Bounded pool of embedded render surfaces.
//!
//! Surfaces are expensive and stateful, so they are leased: acquired for
//! one render, reset, and returned. Admission is a token channel holding
//! one permit per slot; a caller that cannot get a permit within the
//! acquire timeout receives [`RenderError::PoolExhausted`] and falls back
//! to plain rendering. A faulted surface is destroyed instead of returned
//! and its slot is refilled lazily on the next acquire, so the pool heals
//! itself without operator intervention.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use super::surface::RenderSurface;
use crate::error::RenderError;

/// Bounded pool of reusable [`RenderSurface`]s.
#[derive(Debug)]
pub struct RenderContextPool {
    /// One token per slot; holding a token is holding a slot.
    permit_tx: Sender<()>,
    permit_rx: Receiver<()>,
    /// Idle surfaces ready for lease.
    free: Mutex<Vec<RenderSurface>>,
    acquire_timeout: Duration,
    capacity: usize,
    /// Surfaces destroyed after a fault.
    faults: AtomicU64,
}

impl RenderContextPool {
    /// Create a pool with `capacity` slots.
    ///
    /// Surfaces themselves are created lazily on first acquire of each
    /// slot.
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        let (permit_tx, permit_rx) = bounded(capacity);
        for _ in 0..capacity {
            // Filling a channel we just created with matching capacity.
            let _ = permit_tx.send(());
        }
        Self {
            permit_tx,
            permit_rx,
            free: Mutex::new(Vec::with_capacity(capacity)),
            acquire_timeout,
            capacity,
            faults: AtomicU64::new(0),
        }
    }

    /// Acquire a surface lease, blocking up to the acquire timeout.
    ///
    /// The surface comes resized to `width`. Fails with
    /// [`RenderError::PoolExhausted`] when every slot stays busy for the
    /// whole timeout; the caller is expected to fall back to plain
    /// rendering rather than wait longer.
    pub fn acquire(&self, width: u16) -> Result<SurfaceLease<'_>, RenderError> {
        if self.permit_rx.recv_timeout(self.acquire_timeout).is_err() {
            return Err(RenderError::PoolExhausted {
                waited: self.acquire_timeout,
            });
        }
        let mut surface = {
            let mut free = self
                .free
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            free.pop()
        }
        .unwrap_or_else(|| {
            debug!(width, "creating render surface");
            RenderSurface::new(width)
        });
        surface.set_width(width);
        Ok(SurfaceLease {
            surface: Some(surface),
            pool: self,
            faulted: false,
        })
    }

    /// Number of currently free slots.
    pub fn available(&self) -> usize {
        self.permit_rx.len()
    }

    /// Total slots.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Surfaces destroyed after faults since the pool was created.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Return a surface (or bury it) and free its slot.
    fn release(&self, surface: RenderSurface, faulted: bool) {
        if faulted {
            self.faults.fetch_add(1, Ordering::Relaxed);
            warn!("destroying faulted render surface");
            drop(surface);
        } else {
            let mut reusable = surface;
            reusable.reset();
            self.free
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(reusable);
        }
        // The slot frees regardless of the surface's fate.
        let _ = self.permit_tx.send(());
    }
}

/// A temporary, exclusive hold on a pooled surface.
///
/// Dropping the lease returns the surface to the pool (reset to blank),
/// or destroys it if [`SurfaceLease::mark_faulted`] was called.
#[derive(Debug)]
pub struct SurfaceLease<'a> {
    surface: Option<RenderSurface>,
    pool: &'a RenderContextPool,
    faulted: bool,
}

impl SurfaceLease<'_> {
    /// Access the leased surface.
    ///
    /// # Panics
    ///
    /// Panics if called after the lease was consumed (which cannot happen
    /// through the public API).
    pub fn surface_mut(&mut self) -> &mut RenderSurface {
        self.surface
            .as_mut()
            .expect("lease always holds a surface until dropped")
    }

    /// Mark the surface irrecoverably faulted; it will be destroyed on
    /// release instead of returned to the pool.
    pub fn mark_faulted(&mut self) {
        self.faulted = true;
    }
}

impl Drop for SurfaceLease<'_> {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            self.pool.release(surface, self.faulted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::unit::RenderableUnit;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn pool(capacity: usize) -> RenderContextPool {
        RenderContextPool::new(capacity, Duration::from_millis(50))
    }

    #[test]
    fn test_acquire_release_cycle() {
        let pool = pool(2);
        assert_eq!(pool.available(), 2);
        {
            let mut lease = pool.acquire(80).unwrap();
            assert_eq!(pool.available(), 1);
            let unit = RenderableUnit::snapshot("hello", false);
            lease
                .surface_mut()
                .load(&unit, Instant::now() + Duration::from_secs(1))
                .unwrap();
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_released_surface_is_reused() {
        let pool = pool(1);
        {
            let mut lease = pool.acquire(80).unwrap();
            let unit = RenderableUnit::snapshot("first", false);
            lease
                .surface_mut()
                .load(&unit, Instant::now() + Duration::from_secs(1))
                .unwrap();
        }
        let mut lease = pool.acquire(80).unwrap();
        // Same surface object: its load counter survived the lease cycle.
        assert_eq!(lease.surface_mut().loads(), 1);
    }

    #[test]
    fn test_exhaustion_times_out_not_hangs() {
        let pool = pool(1);
        let _held = pool.acquire(80).unwrap();
        let start = Instant::now();
        let err = pool.acquire(80).unwrap_err();
        assert!(matches!(err, RenderError::PoolExhausted { .. }));
        // Bounded wait: well under a second for a 50ms timeout.
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_faulted_surface_is_replaced() {
        let pool = pool(1);
        {
            let mut lease = pool.acquire(80).unwrap();
            let unit = RenderableUnit::snapshot("x", false);
            lease
                .surface_mut()
                .load(&unit, Instant::now() + Duration::from_secs(1))
                .unwrap();
            lease.mark_faulted();
        }
        assert_eq!(pool.faults(), 1);
        // Slot freed; a fresh surface is created lazily.
        let mut lease = pool.acquire(80).unwrap();
        assert_eq!(lease.surface_mut().loads(), 0);
    }

    #[test]
    fn test_concurrent_leases_never_exceed_capacity() {
        let pool = RenderContextPool::new(3, Duration::from_secs(5));
        let live = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..10 {
                scope.spawn(|| {
                    let lease = pool.acquire(40).unwrap();
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    live.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available(), 3);
    }
}
