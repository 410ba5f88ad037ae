//! Counting semaphore over a bounded channel.
//!
//! A permit is a token in a bounded channel: acquiring receives one,
//! dropping the permit sends it back. The channel's buffer is the whole
//! state, so admission is naturally fair-ish and never busy-waits.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Counting semaphore bounding concurrent work.
#[derive(Debug, Clone)]
pub struct Semaphore {
    tx: Sender<()>,
    rx: Receiver<()>,
}

/// An acquired permit; dropping it releases the slot.
#[derive(Debug)]
pub struct Permit {
    tx: Sender<()>,
}

impl Semaphore {
    /// Create a semaphore with `permits` slots.
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        let (tx, rx) = bounded(permits);
        for _ in 0..permits {
            // Filling a channel we just created with matching capacity.
            let _ = tx.send(());
        }
        Self { tx, rx }
    }

    /// Acquire a permit, waiting as long as it takes.
    ///
    /// Callers waiting here are queued, never dropped.
    pub fn acquire(&self) -> Permit {
        // Cannot disconnect: we hold both ends for the semaphore's lifetime.
        let _ = self.rx.recv();
        Permit {
            tx: self.tx.clone(),
        }
    }

    /// Acquire a permit if one frees up within `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Permit> {
        self.rx.recv_timeout(timeout).ok().map(|()| Permit {
            tx: self.tx.clone(),
        })
    }

    /// Acquire a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        self.rx.try_recv().ok().map(|()| Permit {
            tx: self.tx.clone(),
        })
    }

    /// Number of currently free permits.
    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}
