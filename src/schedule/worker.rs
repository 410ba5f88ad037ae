//! Render workers: the threads that execute renders off the caller.
//!
//! A fixed-size pool of named worker threads consumes render jobs from a
//! channel, runs them through the cache → renderer → fallback chain, and
//! reports outcomes back. The global semaphore is taken inside the worker
//! so admission control covers every render path; excess jobs queue, they
//! are never dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use super::semaphore::Semaphore;
use crate::error::RenderError;
use crate::ingest::MessageId;
use crate::render::{
    CacheKey, ContentClass, RenderCache, RenderContextPool, RenderResult, RenderableUnit,
    TextRenderer,
};

/// One render request for one message.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// The message being rendered.
    pub message_id: MessageId,
    /// Snapshot to render.
    pub unit: RenderableUnit,
    /// Constraint width for wrapping and measurement.
    pub width: u16,
}

/// The result of executing one render job.
#[derive(Debug)]
pub struct RenderOutcome {
    /// The message the job belonged to.
    pub message_id: MessageId,
    /// The render result, or a fatal error when even fallback failed.
    pub result: Result<Arc<RenderResult>, RenderError>,
    /// The recoverable error that forced a fallback render, if any.
    pub degraded: Option<RenderError>,
    /// Whether the result came from the memo cache.
    pub from_cache: bool,
    /// Content class of the rendered unit, for height-history updates.
    pub class: ContentClass,
}

/// Fixed-size pool of render worker threads.
#[derive(Debug)]
pub struct RenderWorkers {
    job_tx: Sender<RenderJob>,
    outcome_rx: Receiver<RenderOutcome>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

/// Everything a worker needs, shared across the pool.
struct WorkerShared {
    pool: Arc<RenderContextPool>,
    cache: Arc<Mutex<RenderCache>>,
    semaphore: Semaphore,
    surface_timeout: Duration,
}

impl RenderWorkers {
    /// Spawn `threads` workers over the shared render services.
    pub fn spawn(
        threads: usize,
        pool: Arc<RenderContextPool>,
        cache: Arc<Mutex<RenderCache>>,
        semaphore: Semaphore,
        surface_timeout: Duration,
    ) -> Self {
        let threads = threads.max(1);
        let (job_tx, job_rx) = bounded::<RenderJob>(256);
        let (outcome_tx, outcome_rx) = bounded::<RenderOutcome>(1024);
        let shutdown = Arc::new(AtomicBool::new(false));

        let shared = Arc::new(WorkerShared {
            pool,
            cache,
            semaphore,
            surface_timeout,
        });

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let shutdown = shutdown.clone();
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("cascade-render-{index}"))
                .spawn(move || {
                    Self::run_loop(&job_rx, &outcome_tx, &shutdown, &shared);
                })
                .expect("failed to spawn render worker thread");
            handles.push(handle);
        }

        Self {
            job_tx,
            outcome_rx,
            handles,
            shutdown,
        }
    }

    /// Queue a job for execution.
    ///
    /// Returns `false` if the queue is full or the workers are gone; the
    /// caller keeps the message's in-flight flag clear and retries on a
    /// later pump.
    pub fn submit(&self, job: RenderJob) -> bool {
        match self.job_tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(message_id = %job.message_id, "render queue full, deferring");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drain all finished outcomes without blocking.
    pub fn drain_outcomes(&self) -> Vec<RenderOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Signal workers to stop and wait for them to finish.
    pub fn join(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn run_loop(
        job_rx: &Receiver<RenderJob>,
        outcome_tx: &Sender<RenderOutcome>,
        shutdown: &Arc<AtomicBool>,
        shared: &WorkerShared,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let Ok(job) = job_rx.recv_timeout(Duration::from_millis(16)) else {
                continue;
            };
            let outcome = execute(job, shared);
            if outcome_tx.send(outcome).is_err() {
                break;
            }
        }
    }
}

impl Drop for RenderWorkers {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Run one job through admission, cache, renderer and fallback.
fn execute(job: RenderJob, shared: &WorkerShared) -> RenderOutcome {
    // Global admission: waits for a permit, never drops the job.
    let _permit = shared.semaphore.acquire();

    let key = CacheKey {
        fingerprint: job.unit.fingerprint(),
        width: job.width,
    };
    let cached = shared
        .cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key);
    if let Some(result) = cached {
        debug!(message_id = %job.message_id, "render served from cache");
        return RenderOutcome {
            message_id: job.message_id,
            result: Ok(result),
            degraded: None,
            from_cache: true,
            class: job.unit.class,
        };
    }

    let (result, degraded) = match job.unit.class {
        ContentClass::PlainText | ContentClass::Markup => {
            (TextRenderer::render(&job.unit, job.width), None)
        }
        ContentClass::EmbeddedSurface(kind) => {
            match render_embedded(&job.unit, job.width, shared) {
                Ok(result) => (result, None),
                Err(err) if err.is_recoverable() => {
                    warn!(
                        message_id = %job.message_id,
                        ?kind,
                        error = %err,
                        "embedded render failed, falling back to plain text"
                    );
                    (TextRenderer::render_fallback(&job.unit, job.width), Some(err))
                }
                Err(err) => {
                    return RenderOutcome {
                        message_id: job.message_id,
                        result: Err(err),
                        degraded: None,
                        from_cache: false,
                        class: job.unit.class,
                    };
                }
            }
        }
    };

    let result = Arc::new(result);
    // Fallback results are not memoized: the expensive render should get
    // another chance once the pool frees up.
    if degraded.is_none() {
        shared
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, result.clone());
    }
    RenderOutcome {
        message_id: job.message_id,
        result: Ok(result),
        degraded,
        from_cache: false,
        class: job.unit.class,
    }
}

/// The expensive path: lease a pooled surface and load the unit into it.
fn render_embedded(
    unit: &RenderableUnit,
    width: u16,
    shared: &WorkerShared,
) -> Result<RenderResult, RenderError> {
    let mut lease = shared.pool.acquire(width)?;
    let deadline = Instant::now() + shared.surface_timeout;
    match lease.surface_mut().load(unit, deadline) {
        Ok(result) => Ok(result),
        Err(err) => {
            // A surface abandoned mid-load may hold partial escape state;
            // destroy it rather than trust a reset.
            lease.mark_faulted();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers(pool_capacity: usize, timeout: Duration) -> RenderWorkers {
        let pool = Arc::new(RenderContextPool::new(pool_capacity, timeout));
        let cache = Arc::new(Mutex::new(RenderCache::new(64)));
        RenderWorkers::spawn(2, pool, cache, Semaphore::new(3), Duration::from_secs(3))
    }

    fn wait_outcomes(workers: &RenderWorkers, count: usize) -> Vec<RenderOutcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut outcomes = Vec::new();
        while outcomes.len() < count && Instant::now() < deadline {
            outcomes.extend(workers.drain_outcomes());
            thread::sleep(Duration::from_millis(2));
        }
        outcomes
    }

    #[test]
    fn test_text_job_round_trip() {
        let workers = workers(2, Duration::from_millis(100));
        let job = RenderJob {
            message_id: MessageId(1),
            unit: RenderableUnit::snapshot("hello worker", false),
            width: 40,
        };
        assert!(workers.submit(job));
        let outcomes = wait_outcomes(&workers, 1);
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert!(outcome.result.is_ok());
        assert!(!outcome.from_cache);
        assert!(outcome.degraded.is_none());
        workers.join();
    }

    #[test]
    fn test_identical_job_hits_cache() {
        let workers = workers(2, Duration::from_millis(100));
        let job = RenderJob {
            message_id: MessageId(1),
            unit: RenderableUnit::snapshot("memoize me", false),
            width: 40,
        };
        workers.submit(job.clone());
        let first = wait_outcomes(&workers, 1);
        assert!(!first[0].from_cache);

        workers.submit(job);
        let second = wait_outcomes(&workers, 1);
        assert!(second[0].from_cache);
        workers.join();
    }

    #[test]
    fn test_embedded_job_renders_through_pool() {
        let workers = workers(2, Duration::from_millis(200));
        let job = RenderJob {
            message_id: MessageId(2),
            unit: RenderableUnit::snapshot("```\nlet x = 1;\n```", false),
            width: 40,
        };
        workers.submit(job);
        let outcomes = wait_outcomes(&workers, 1);
        let outcome = &outcomes[0];
        assert!(outcome.degraded.is_none());
        let result = outcome.result.as_ref().unwrap();
        assert!(!result.fallback);
        assert!(result.size.height >= 3);
        workers.join();
    }

    #[test]
    fn test_pool_exhaustion_falls_back() {
        // Hold the pool's only surface so every embedded render exhausts
        // the acquire timeout.
        let pool = Arc::new(RenderContextPool::new(1, Duration::from_millis(30)));
        let cache = Arc::new(Mutex::new(RenderCache::new(64)));
        let workers = RenderWorkers::spawn(
            1,
            pool.clone(),
            cache,
            Semaphore::new(3),
            Duration::from_secs(3),
        );
        let _held = pool.acquire(40).unwrap();

        let job = RenderJob {
            message_id: MessageId(3),
            unit: RenderableUnit::snapshot("```\ncode\n```", false),
            width: 40,
        };
        workers.submit(job);
        let outcomes = wait_outcomes(&workers, 1);
        let outcome = &outcomes[0];
        assert!(matches!(
            outcome.degraded,
            Some(RenderError::PoolExhausted { .. })
        ));
        let result = outcome.result.as_ref().unwrap();
        assert!(result.fallback);
        // Fallback still carries the content.
        assert!(result.lines.iter().any(|l| l.text().contains("code")));
        workers.join();
    }
}
