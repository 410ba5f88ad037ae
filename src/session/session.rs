//! Stream session: the per-message state machine.
//!
//! One session per actively streaming message. It owns the message's
//! sequenced buffer and flush bookkeeping; the engine drives it and
//! forwards its snapshots to the render workers.

use std::time::Instant;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::BufferError;
use crate::ingest::{AppendedRange, Chunk, FlushPolicy, FlushReason, MessageId, SequencedBuffer};
use crate::render::RenderableUnit;

/// Lifecycle states of a streaming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session exists but no chunk has been applied yet.
    Created,
    /// Ingesting and periodically flushing/rendering.
    Streaming,
    /// Completion signal received; draining and forcing the final render.
    Finalizing,
    /// Final height committed.
    Settled,
    /// Cancelled by the consumer; no further renders are scheduled.
    Cancelled,
    /// Evicted under memory pressure.
    Evicted,
}

impl SessionState {
    /// Whether the session accepts no further work.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Evicted)
    }
}

/// Per-message streaming state machine.
#[derive(Debug)]
pub struct StreamSession {
    id: MessageId,
    state: SessionState,
    buffer: SequencedBuffer,
    policy: FlushPolicy,
    /// Content length at the last flush.
    last_flush_len: usize,
    last_flush_at: Instant,
    /// Buffer truncation epoch the flush bookkeeping was computed for.
    flush_epoch: u64,
    /// The completion flush has been handed to the renderer.
    final_flush_done: bool,
    /// Last time a chunk arrived; drives LRU eviction.
    last_activity: Instant,
}

impl StreamSession {
    /// Create a session for its first chunk.
    pub fn new(id: MessageId, config: &PipelineConfig, now: Instant) -> Self {
        Self {
            id,
            state: SessionState::Created,
            buffer: SequencedBuffer::new(
                config.holding_capacity,
                config.buffer_cap_bytes,
                config.gap_timeout,
            ),
            policy: FlushPolicy::new(config.flush_size_threshold, config.flush_max_wait),
            last_flush_len: 0,
            last_flush_at: now,
            flush_epoch: 0,
            final_flush_done: false,
            last_activity: now,
        }
    }

    /// The session's message id.
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The owned sequenced buffer.
    pub const fn buffer(&self) -> &SequencedBuffer {
        &self.buffer
    }

    /// Last chunk arrival time.
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Ingest one chunk. Never blocks.
    pub fn ingest(&mut self, chunk: Chunk, now: Instant) -> Result<AppendedRange, BufferError> {
        if self.state.is_terminal() {
            return Err(BufferError::MessageComplete {
                sequence: chunk.sequence,
            });
        }
        let range = self.buffer.ingest(chunk, now)?;
        self.last_activity = now;
        self.advance_state();
        Ok(range)
    }

    /// Give a stalled sequence gap a chance to be skipped.
    pub fn poll(&mut self, now: Instant) -> AppendedRange {
        if self.state.is_terminal() {
            return AppendedRange::EMPTY;
        }
        let range = self.buffer.poll_gap(now);
        if !range.is_empty() {
            self.advance_state();
        }
        range
    }

    fn advance_state(&mut self) {
        self.state = match self.state {
            SessionState::Created | SessionState::Streaming => {
                if self.buffer.is_complete() {
                    SessionState::Finalizing
                } else {
                    SessionState::Streaming
                }
            }
            other => other,
        };
    }

    /// Whether a flush is due, and why.
    pub fn flush_due(&self, now: Instant) -> Option<FlushReason> {
        match self.state {
            SessionState::Streaming | SessionState::Finalizing => {}
            _ => return None,
        }
        if self.final_flush_done {
            return None;
        }
        let pending = self.pending();
        self.policy.evaluate(
            pending,
            self.buffer.is_complete(),
            now.duration_since(self.last_flush_at),
        )
    }

    /// Content buffered since the last flush.
    fn pending(&self) -> &str {
        // A truncation rebases the content; re-flush everything after one.
        let from = if self.flush_epoch == self.buffer.truncation_epoch() {
            self.last_flush_len.min(self.buffer.len())
        } else {
            0
        };
        &self.buffer.content()[from..]
    }

    /// Snapshot the full current content as a renderable unit.
    ///
    /// Always the whole row: renders re-render the row, not a delta, so
    /// earlier prefixes hit the memo cache.
    pub fn snapshot_unit(&self) -> RenderableUnit {
        if self.buffer.is_truncated() {
            RenderableUnit::snapshot_truncated(self.buffer.content(), self.buffer.is_complete())
        } else {
            RenderableUnit::snapshot(self.buffer.content(), self.buffer.is_complete())
        }
    }

    /// Record that a snapshot was handed to the renderer.
    pub fn mark_flushed(&mut self, now: Instant, was_complete: bool) {
        self.last_flush_len = self.buffer.len();
        self.last_flush_at = now;
        self.flush_epoch = self.buffer.truncation_epoch();
        if was_complete {
            self.final_flush_done = true;
        }
    }

    /// Undo the completion-flush latch so the row renders again (used
    /// when the constraint width changes after settling).
    pub fn reopen_for_rerender(&mut self) {
        if matches!(self.state, SessionState::Settled | SessionState::Finalizing) {
            self.final_flush_done = false;
            self.last_flush_len = 0;
            self.state = SessionState::Finalizing;
        } else if !self.state.is_terminal() {
            self.last_flush_len = 0;
        }
    }

    /// Note that a committed render landed for this session.
    ///
    /// Returns `true` when this commit settled the session.
    pub fn on_committed(&mut self, result_was_complete: bool) -> bool {
        if self.state == SessionState::Finalizing && result_was_complete {
            self.state = SessionState::Settled;
            debug!(message_id = %self.id, "session settled");
            return true;
        }
        false
    }

    /// Cancel the session. Idempotent; valid from any non-terminal state.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Cancelled;
        }
    }

    /// Mark the session evicted under memory pressure.
    pub fn evict(&mut self) {
        if self.state != SessionState::Cancelled {
            self.state = SessionState::Evicted;
        }
    }
}
