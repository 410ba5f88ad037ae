//! Stream engine: the coordinator that owns the whole pipeline.
//!
//! One engine serves many concurrently streaming messages. It owns the
//! sessions map and all injected shared services (surface pool, memo
//! cache, worker pool, scheduler, layout coordinator) and is driven by
//! two calls: [`StreamEngine::ingest`] for every arriving chunk and
//! [`StreamEngine::pump`] on a periodic tick. Results leave through a
//! single event channel.
//!
//! Per-key exclusivity falls out of ownership: sessions are only touched
//! through `&mut self`, so independent messages never contend on a lock;
//! the only genuinely shared resources are the pool (which serializes its
//! own admission) and the memo cache (a lightweight mutex, never held
//! across a render).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use super::events::SessionEvent;
use super::session::{SessionState, StreamSession};
use crate::config::PipelineConfig;
use crate::error::{BufferError, Error};
use crate::ingest::{Chunk, MessageId};
use crate::layout::{Commit, HeightPredictor, LayoutCoordinator};
use crate::render::{ContentClass, RenderCache, RenderContextPool};
use crate::schedule::{RenderJob, RenderScheduler, RenderWorkers, Semaphore};

/// Counters describing pipeline behavior since the engine was created.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    /// Render outcomes applied (cache hits included).
    pub renders: u64,
    /// Renders served from the memo cache.
    pub cache_hits: u64,
    /// Renders that degraded to the plain-text fallback.
    pub fallbacks: u64,
    /// Renders that failed with no fallback.
    pub failures: u64,
    /// Sessions evicted under memory pressure.
    pub evictions: u64,
    /// Smoothed render cost in microseconds.
    pub avg_render_us: u64,
}

/// Top-level streaming render engine.
pub struct StreamEngine {
    config: PipelineConfig,
    width: u16,
    sessions: HashMap<MessageId, StreamSession>,
    scheduler: RenderScheduler,
    coordinator: LayoutCoordinator,
    predictor: HeightPredictor,
    pool: Arc<RenderContextPool>,
    cache: Arc<Mutex<RenderCache>>,
    workers: RenderWorkers,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    stats: PipelineStats,
}

impl StreamEngine {
    /// Create an engine with the default configuration.
    pub fn new(constraint_width: u16) -> Self {
        Self::with_config(constraint_width, PipelineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(constraint_width: u16, config: PipelineConfig) -> Self {
        let pool = Arc::new(RenderContextPool::new(
            config.pool_capacity,
            config.pool_acquire_timeout,
        ));
        let cache = Arc::new(Mutex::new(RenderCache::new(config.cache_capacity)));
        let semaphore = Semaphore::new(config.max_concurrent_renders);
        let workers = RenderWorkers::spawn(
            config.worker_threads,
            pool.clone(),
            cache.clone(),
            semaphore,
            config.surface_timeout,
        );
        let (events_tx, events_rx) = unbounded();

        Self {
            scheduler: RenderScheduler::new(&config),
            coordinator: LayoutCoordinator::new(&config),
            predictor: HeightPredictor::default(),
            sessions: HashMap::new(),
            width: constraint_width.max(1),
            pool,
            cache,
            workers,
            events_tx,
            events_rx,
            stats: PipelineStats::default(),
            config,
        }
    }

    /// The event channel the toolkit integration drains.
    pub const fn events(&self) -> &Receiver<SessionEvent> {
        &self.events_rx
    }

    /// Ingest one chunk from the transport. Never blocks.
    ///
    /// Duplicate and post-completion chunks return an error for
    /// observability but leave all state unchanged; they are contained to
    /// this message and nothing else is affected.
    pub fn ingest(&mut self, chunk: Chunk) -> Result<(), Error> {
        self.ingest_at(chunk, Instant::now())
    }

    /// [`StreamEngine::ingest`] with an explicit clock, for tests.
    pub fn ingest_at(&mut self, chunk: Chunk, now: Instant) -> Result<(), Error> {
        let id = chunk.message_id;
        if !self.sessions.contains_key(&id) {
            self.evict_for_capacity(now);
            self.sessions
                .insert(id, StreamSession::new(id, &self.config, now));
            self.coordinator.track(id);
        }

        // Session was just inserted or already present.
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(());
        };
        if session.state().is_terminal() {
            debug!(message_id = %id, "dropping chunk for terminal session");
            return Ok(());
        }

        match session.ingest(chunk, now) {
            Ok(_) => {
                self.refresh_estimate(id);
                Ok(())
            }
            Err(err @ BufferError::DuplicateChunk { .. }) => {
                debug!(message_id = %id, error = %err, "duplicate chunk dropped");
                Err(err.into())
            }
            Err(err) => {
                warn!(message_id = %id, error = %err, "chunk rejected");
                Err(err.into())
            }
        }
    }

    /// Predict a row height before a measurement exists.
    fn refresh_estimate(&mut self, id: MessageId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if self.coordinator.result(id).is_some() {
            return;
        }
        let content = session.buffer().content();
        let class = ContentClass::classify(content);
        let estimate = self.predictor.estimate(class, content.chars().count());
        if self.coordinator.commit_estimate(id, estimate) {
            self.emit(SessionEvent::HeightChanged {
                message_id: id,
                height: estimate,
            });
        }
    }

    /// Drive the pipeline: apply finished renders, evaluate flushes,
    /// admit new renders, and advance height animations.
    ///
    /// Call on a periodic tick (the adaptive render intervals assume a
    /// cadence at least as fine as `min_render_interval`).
    pub fn pump(&mut self, now: Instant) {
        self.apply_outcomes(now);
        self.admit_renders(now);
        self.advance_animations(now);
    }

    fn apply_outcomes(&mut self, now: Instant) {
        for outcome in self.workers.drain_outcomes() {
            let id = outcome.message_id;
            let Some(session) = self.sessions.get_mut(&id) else {
                debug!(message_id = %id, "discarding outcome for removed session");
                continue;
            };
            if session.state().is_terminal() {
                // Cancelled mid-render: the lease was already released by
                // the worker; the result is simply not applied.
                debug!(message_id = %id, "discarding outcome for terminal session");
                continue;
            }

            match outcome.result {
                Ok(result) => {
                    self.stats.renders += 1;
                    if outcome.from_cache {
                        self.stats.cache_hits += 1;
                    }
                    self.scheduler.record_render(id, now, result.duration);
                    self.record_cost(result.duration);

                    if let Some(reason) = outcome.degraded {
                        self.stats.fallbacks += 1;
                        self.emit(SessionEvent::RenderFailed {
                            message_id: id,
                            reason,
                        });
                    } else {
                        self.predictor
                            .observe(outcome.class, result.source_chars, result.size.height);
                    }

                    let was_complete = result.is_complete;
                    match self.coordinator.commit(id, result.clone(), now) {
                        Commit::Applied {
                            height,
                            animated: _,
                            scroll_to_bottom,
                        } => {
                            self.emit(SessionEvent::RenderReady {
                                message_id: id,
                                result,
                                height,
                            });
                            if scroll_to_bottom {
                                self.emit(SessionEvent::ScrollToBottomRequested {
                                    message_id: id,
                                });
                            }
                            let settled = self
                                .sessions
                                .get_mut(&id)
                                .is_some_and(|s| s.on_committed(was_complete));
                            if settled {
                                self.emit(SessionEvent::Settled {
                                    message_id: id,
                                    height,
                                });
                            }
                        }
                        Commit::DiscardedStale => {}
                    }
                }
                Err(reason) => {
                    self.stats.failures += 1;
                    self.scheduler.record_render(id, now, Duration::ZERO);
                    warn!(message_id = %id, error = %reason, "render failed irrecoverably");
                    // The row keeps its last-known-good content.
                    self.emit(SessionEvent::RenderFailed {
                        message_id: id,
                        reason,
                    });
                }
            }
        }
    }

    fn admit_renders(&mut self, now: Instant) {
        let ids: Vec<MessageId> = self.sessions.keys().copied().collect();
        for id in ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.state().is_terminal() {
                continue;
            }
            // Abandon stalled sequence gaps even with no new arrivals.
            let drained = session.poll(now);
            if !drained.is_empty() {
                self.refresh_estimate(id);
            }

            let Some(session) = self.sessions.get(&id) else {
                continue;
            };
            if session.flush_due(now).is_none() {
                continue;
            }
            if !self.scheduler.should_render_now(id, now) {
                continue;
            }

            let unit = session.snapshot_unit();
            let was_complete = unit.is_complete;
            let job = RenderJob {
                message_id: id,
                unit,
                width: self.width,
            };
            self.scheduler.begin_render(id);
            if self.workers.submit(job) {
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.mark_flushed(now, was_complete);
                }
            } else {
                // Queue full: count it as a free render so the interval
                // backs off and the flush fires again next pump.
                self.scheduler.record_render(id, now, Duration::ZERO);
            }
        }
    }

    fn advance_animations(&mut self, now: Instant) {
        for (id, height) in self.coordinator.advance(now) {
            self.emit(SessionEvent::HeightChanged {
                message_id: id,
                height,
            });
        }
    }

    /// Cancel a message. Idempotent; valid from any state.
    ///
    /// No render for this message is scheduled after this returns.
    /// Workers hold their own leases per job, so there is never a lease
    /// retained on the session's behalf to release here; an in-flight
    /// render finishes in the background and its outcome is discarded.
    pub fn cancel(&mut self, id: MessageId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.cancel();
        }
        self.scheduler.remove(id);
    }

    /// Report the viewport's distance from the bottom, driving follow mode.
    pub fn viewport_moved(&mut self, distance_from_bottom: u32) {
        self.coordinator.viewport_moved(distance_from_bottom);
    }

    /// Whether the view is pinned to the newest content.
    pub const fn follow_latest(&self) -> bool {
        self.coordinator.follow_latest()
    }

    /// Change the constraint width; every live row re-renders at the new
    /// width. Cache entries for the old width age out via LRU.
    pub fn set_constraint_width(&mut self, width: u16) {
        let width = width.max(1);
        if width == self.width {
            return;
        }
        self.width = width;
        // Reopened flush latches make the next pump re-render every row.
        for session in self.sessions.values_mut() {
            if session.state().is_terminal() || session.buffer().is_empty() {
                continue;
            }
            session.reopen_for_rerender();
        }
    }

    /// Current constraint width.
    pub const fn constraint_width(&self) -> u16 {
        self.width
    }

    /// Current visible height of a row.
    pub fn height(&self, id: MessageId) -> Option<u32> {
        self.coordinator.height(id, Instant::now())
    }

    /// Lifecycle state of a session.
    pub fn session_state(&self, id: MessageId) -> Option<SessionState> {
        self.sessions.get(&id).map(StreamSession::state)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Pipeline counters.
    pub const fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Whether no renders are in flight and no flush is due.
    pub fn is_idle(&self, now: Instant) -> bool {
        !self.sessions.keys().any(|id| self.scheduler.in_flight(*id))
            && self
                .sessions
                .values()
                .all(|s| s.flush_due(now).is_none())
    }

    /// Pump repeatedly until idle or the timeout elapses. Test and demo
    /// convenience; production consumers drive `pump` from their tick.
    pub fn drain_until_idle(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            self.pump(now);
            if self.is_idle(now) || now >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Evict the least-recently-active session when at capacity.
    fn evict_for_capacity(&mut self, _now: Instant) {
        while self.sessions.len() >= self.config.max_sessions.max(1) {
            let victim = self.pick_eviction_victim();
            let Some(id) = victim else { break };
            warn!(message_id = %id, "evicting session under memory pressure");
            if let Some(mut session) = self.sessions.remove(&id) {
                session.evict();
            }
            self.scheduler.remove(id);
            self.coordinator.remove(id);
            self.stats.evictions += 1;
            self.emit(SessionEvent::Evicted { message_id: id });
        }
    }

    /// Settled sessions are preferred victims; active streams survive
    /// pressure longest.
    fn pick_eviction_victim(&self) -> Option<MessageId> {
        let settled = self
            .sessions
            .values()
            .filter(|s| s.state() == SessionState::Settled)
            .min_by_key(|s| s.last_activity())
            .map(StreamSession::id);
        settled.or_else(|| {
            self.sessions
                .values()
                .min_by_key(|s| s.last_activity())
                .map(StreamSession::id)
        })
    }

    fn record_cost(&mut self, cost: Duration) {
        let cost_us = u64::try_from(cost.as_micros()).unwrap_or(u64::MAX);
        self.stats.avg_render_us = if self.stats.avg_render_us == 0 {
            cost_us
        } else {
            (self.stats.avg_render_us * 15 + cost_us) / 16
        };
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Free-slot count of the surface pool (observability).
    pub fn pool_available(&self) -> usize {
        self.pool.available()
    }

    /// Number of memoized render results (observability).
    pub fn cache_len(&self) -> usize {
        self.cache
            .lock()
            .map(|c| c.len())
            .unwrap_or(0)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const ID: MessageId = MessageId(1);

    fn engine() -> StreamEngine {
        StreamEngine::with_config(
            80,
            PipelineConfig {
                flush_size_threshold: 4,
                min_render_interval: Duration::ZERO,
                base_render_interval: Duration::ZERO,
                ..PipelineConfig::default()
            },
        )
    }

    fn drain_events(engine: &StreamEngine) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = engine.events().try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_ingest_creates_session_and_estimate() {
        let mut engine = engine();
        engine
            .ingest(Chunk::new(ID, 0, "hello streaming world"))
            .unwrap();
        assert_eq!(engine.session_count(), 1);
        assert_eq!(engine.session_state(ID), Some(SessionState::Streaming));

        let events = drain_events(&engine);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::HeightChanged { .. })));
    }

    #[test]
    fn test_full_stream_renders_and_settles() {
        let mut engine = engine();
        engine.ingest(Chunk::new(ID, 0, "Hello, ")).unwrap();
        engine.ingest(Chunk::final_chunk(ID, 1, "world!")).unwrap();
        engine.drain_until_idle(Duration::from_secs(5));

        assert_eq!(engine.session_state(ID), Some(SessionState::Settled));
        let events = drain_events(&engine);
        let ready = events.iter().rev().find_map(|e| match e {
            SessionEvent::RenderReady { result, .. } => Some(result.clone()),
            _ => None,
        });
        let result = ready.expect("a render result must be delivered");
        assert!(result
            .lines
            .iter()
            .any(|l| l.text().contains("Hello, world!")));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Settled { .. })));
    }

    #[test]
    fn test_duplicate_chunk_contained() {
        let mut engine = engine();
        engine.ingest(Chunk::new(ID, 0, "once")).unwrap();
        let err = engine.ingest(Chunk::new(ID, 0, "once")).unwrap_err();
        assert!(matches!(
            err,
            Error::Buffer(BufferError::DuplicateChunk { .. })
        ));
        // The session is unharmed.
        assert_eq!(engine.session_state(ID), Some(SessionState::Streaming));
    }

    #[test]
    fn test_cancel_stops_scheduling() {
        let mut engine = engine();
        engine.ingest(Chunk::new(ID, 0, "some content here")).unwrap();
        engine.cancel(ID);
        engine.cancel(ID); // idempotent
        assert_eq!(engine.session_state(ID), Some(SessionState::Cancelled));

        engine.drain_until_idle(Duration::from_millis(200));
        let events = drain_events(&engine);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::RenderReady { .. })));
    }

    #[test]
    fn test_session_eviction_at_capacity() {
        let mut engine = StreamEngine::with_config(
            80,
            PipelineConfig {
                max_sessions: 2,
                ..PipelineConfig::default()
            },
        );
        let t0 = Instant::now();
        engine
            .ingest_at(Chunk::new(MessageId(1), 0, "a"), t0)
            .unwrap();
        engine
            .ingest_at(Chunk::new(MessageId(2), 0, "b"), t0 + Duration::from_millis(1))
            .unwrap();
        engine
            .ingest_at(Chunk::new(MessageId(3), 0, "c"), t0 + Duration::from_millis(2))
            .unwrap();

        assert_eq!(engine.session_count(), 2);
        assert_eq!(engine.stats().evictions, 1);
        // The least-recently-active session went first.
        assert!(engine.session_state(MessageId(1)).is_none());
        let events = drain_events(&engine);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Evicted {
                message_id: MessageId(1)
            }
        )));
    }

    #[test]
    fn test_width_change_rerenders_settled_row() {
        let mut engine = engine();
        engine
            .ingest(Chunk::final_chunk(ID, 0, "four words wrap differently"))
            .unwrap();
        engine.drain_until_idle(Duration::from_secs(5));
        let tall_before = engine.height(ID).unwrap();
        drain_events(&engine);

        engine.set_constraint_width(10);
        engine.drain_until_idle(Duration::from_secs(5));
        let events = drain_events(&engine);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::RenderReady { .. })));
        let tall_after = engine
            .coordinator
            .target_height(ID)
            .unwrap();
        assert!(tall_after > tall_before);
    }

    #[test]
    fn test_follow_mode_round_trip() {
        let mut engine = engine();
        assert!(engine.follow_latest());
        engine.viewport_moved(200);
        assert!(!engine.follow_latest());
        engine.viewport_moved(5);
        assert!(engine.follow_latest());
    }
}
