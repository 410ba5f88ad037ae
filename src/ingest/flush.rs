//! Flush policy: when buffered content becomes a renderable unit.
//!
//! A pure decision function with no side effects. Triggers are evaluated
//! in order, first match wins: completion signal, size threshold, sentence
//! or paragraph boundary, max-wait. The max-wait trigger guarantees visible
//! progress even on a slow trickle of tiny chunks.

use std::time::Duration;
use unicode_segmentation::UnicodeSegmentation;

/// Why a flush fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The message's completion signal arrived.
    Completed,
    /// Buffered-since-last-flush reached the size threshold.
    SizeThreshold,
    /// Buffered content ends at a sentence or paragraph boundary.
    Boundary,
    /// The max-wait elapsed since the last flush.
    MaxWait,
}

/// Characters that end a sentence or paragraph for flush purposes.
const BOUNDARY_CHARS: [char; 5] = ['.', '!', '?', '…', '\n'];

/// Decides when buffered bytes become a renderable unit.
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    /// Graphemes buffered since the last flush that force a flush.
    size_threshold: usize,
    /// Maximum time buffered content may wait before flushing anyway.
    max_wait: Duration,
}

impl FlushPolicy {
    /// Create a policy with the given thresholds.
    pub const fn new(size_threshold: usize, max_wait: Duration) -> Self {
        Self {
            size_threshold,
            max_wait,
        }
    }

    /// Evaluate the triggers over the current buffer state.
    ///
    /// * `pending` - content buffered since the last flush.
    /// * `complete` - whether the completion signal has been applied.
    /// * `elapsed` - time since the last flush.
    ///
    /// Returns the first matching trigger, or `None` to keep buffering.
    pub fn evaluate(
        &self,
        pending: &str,
        complete: bool,
        elapsed: Duration,
    ) -> Option<FlushReason> {
        if complete {
            // Completion flushes even an empty remainder: the final exact
            // measurement render must still happen.
            return Some(FlushReason::Completed);
        }
        if pending.is_empty() {
            return None;
        }
        if pending.graphemes(true).count() >= self.size_threshold {
            return Some(FlushReason::SizeThreshold);
        }
        if ends_at_boundary(pending) {
            return Some(FlushReason::Boundary);
        }
        if elapsed >= self.max_wait {
            return Some(FlushReason::MaxWait);
        }
        None
    }
}

/// Whether the last non-space character is a sentence/paragraph boundary.
fn ends_at_boundary(pending: &str) -> bool {
    pending
        .chars()
        .rev()
        .find(|c| *c != ' ' && *c != '\t')
        .is_some_and(|c| BOUNDARY_CHARS.contains(&c))
}
