//! Sequenced buffer: per-message append-only content accumulation.
//!
//! Chunks may arrive out of order or more than once. The buffer applies
//! exactly the contiguous prefix of sequence numbers seen so far, parks a
//! bounded number of later chunks in a holding set, and skips a sequence
//! gap outright once it has stalled past a timeout. Total retained bytes
//! are capped; overflow truncates the oldest prefix because chat UIs show
//! the tail of a message, not its head.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::chunk::{AppendedRange, Chunk};
use crate::error::BufferError;

/// Ordered accumulation of one message's content.
///
/// Mutated only by its owning session. The materialized content always
/// reflects exactly the contiguous applied prefix: no gaps, no duplicate
/// application.
#[derive(Debug)]
pub struct SequencedBuffer {
    /// Next sequence number that extends the contiguous prefix.
    next_expected: u64,
    /// Materialized content of the applied prefix.
    content: String,
    /// Out-of-order chunks waiting for the gap to fill.
    held: BTreeMap<u64, Chunk>,
    /// Cap on `held`.
    holding_capacity: usize,
    /// Cap on `content` bytes.
    cap_bytes: usize,
    /// How long a gap may stall before being skipped.
    gap_timeout: Duration,
    /// When the current stall started, if chunks are held.
    gap_since: Option<Instant>,
    /// Whether overflow truncation has discarded the head.
    truncated: bool,
    /// Bumped on every truncation; earlier `AppendedRange`s are stale.
    truncation_epoch: u64,
    /// Sequence of the final chunk, once seen.
    final_sequence: Option<u64>,
    /// Whether the final chunk has been applied in order.
    complete: bool,
}

impl SequencedBuffer {
    /// Create an empty buffer with the given limits.
    pub fn new(holding_capacity: usize, cap_bytes: usize, gap_timeout: Duration) -> Self {
        Self {
            next_expected: 0,
            content: String::new(),
            held: BTreeMap::new(),
            holding_capacity: holding_capacity.max(1),
            cap_bytes: cap_bytes.max(1),
            gap_timeout,
            gap_since: None,
            truncated: false,
            truncation_epoch: 0,
            final_sequence: None,
            complete: false,
        }
    }

    /// Ingest one chunk.
    ///
    /// Never blocks. Returns the byte range appended to the materialized
    /// content, which is empty when the chunk was parked in the holding
    /// set. Duplicates and post-completion chunks are rejected; the buffer
    /// is unchanged by a rejected ingest.
    pub fn ingest(&mut self, chunk: Chunk, now: Instant) -> Result<AppendedRange, BufferError> {
        if self.complete {
            return Err(BufferError::MessageComplete {
                sequence: chunk.sequence,
            });
        }
        if chunk.sequence < self.next_expected {
            return Err(BufferError::DuplicateChunk {
                sequence: chunk.sequence,
            });
        }

        if chunk.sequence == self.next_expected {
            let range = self.apply_contiguous(chunk, now);
            return Ok(range);
        }

        // Out of order: park it.
        if self.held.contains_key(&chunk.sequence) {
            return Err(BufferError::DuplicateChunk {
                sequence: chunk.sequence,
            });
        }
        self.held.insert(chunk.sequence, chunk);
        if self.held.len() > self.holding_capacity {
            // Oldest held chunk is sacrificed to bound memory; its content
            // is lost for good (best-effort ordering, not strict delivery).
            if let Some((seq, _)) = self.held.pop_first() {
                warn!(sequence = seq, "holding set full, dropping oldest held chunk");
            }
        }
        if self.gap_since.is_none() {
            self.gap_since = Some(now);
        }
        Ok(self.maybe_skip_gap(now))
    }

    /// Skip a stalled gap if its timeout has elapsed.
    ///
    /// Called by the owning session on every pump so a gap is abandoned
    /// even when no further chunks arrive. Returns the range drained from
    /// the holding set, empty if nothing changed.
    pub fn poll_gap(&mut self, now: Instant) -> AppendedRange {
        self.maybe_skip_gap(now)
    }

    fn maybe_skip_gap(&mut self, now: Instant) -> AppendedRange {
        let Some(since) = self.gap_since else {
            return AppendedRange::EMPTY;
        };
        if self.held.is_empty() || now.duration_since(since) < self.gap_timeout {
            return AppendedRange::EMPTY;
        }
        // pop_first cannot fail: held is non-empty.
        let Some((seq, chunk)) = self.held.pop_first() else {
            return AppendedRange::EMPTY;
        };
        warn!(
            from = self.next_expected,
            to = seq,
            "sequence gap timed out, skipping permanently"
        );
        self.next_expected = seq;
        self.apply_contiguous(chunk, now)
    }

    /// Apply a chunk matching `next_expected`, then drain the holding set
    /// for anything now contiguous.
    fn apply_contiguous(&mut self, chunk: Chunk, now: Instant) -> AppendedRange {
        let start = self.content.len();
        let mut appended = 0usize;

        appended += self.apply_one(chunk);
        while let Some(chunk) = self.held.remove(&self.next_expected) {
            if self.complete {
                warn!(sequence = chunk.sequence, "dropping held chunk past final");
                continue;
            }
            appended += self.apply_one(chunk);
        }
        if self.complete && !self.held.is_empty() {
            warn!(count = self.held.len(), "dropping held chunks past final");
            self.held.clear();
        }

        // A drain either clears the stall or starts the clock on the next gap.
        self.gap_since = if self.held.is_empty() { None } else { Some(now) };

        let end = start + appended;
        let cut = self.enforce_cap();
        AppendedRange {
            start: start.saturating_sub(cut),
            end: end.saturating_sub(cut),
        }
    }

    fn apply_one(&mut self, chunk: Chunk) -> usize {
        debug!(
            sequence = chunk.sequence,
            bytes = chunk.payload.len(),
            is_final = chunk.is_final,
            "applying chunk"
        );
        self.content.push_str(&chunk.payload);
        self.next_expected = chunk.sequence + 1;
        if chunk.is_final {
            self.final_sequence = Some(chunk.sequence);
            self.complete = true;
        }
        chunk.payload.len()
    }

    /// Truncate the oldest prefix when over the byte cap.
    ///
    /// Returns the number of bytes removed from the head.
    fn enforce_cap(&mut self) -> usize {
        if self.content.len() <= self.cap_bytes {
            return 0;
        }
        let mut cut = self.content.len() - self.cap_bytes;
        while cut < self.content.len() && !self.content.is_char_boundary(cut) {
            cut += 1;
        }
        self.content.replace_range(..cut, "");
        self.truncated = true;
        self.truncation_epoch += 1;
        warn!(bytes = cut, "buffer overflow, truncated oldest content");
        cut
    }

    /// The materialized contiguous content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Byte length of the materialized content.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether no content has been applied yet.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// The sequence number that would extend the contiguous prefix.
    pub const fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of out-of-order chunks currently held.
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// Whether the final chunk has been applied.
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether overflow truncation has discarded the head of the content.
    pub const fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Counter bumped on every truncation.
    pub const fn truncation_epoch(&self) -> u64 {
        self.truncation_epoch
    }

    /// Whether a sequence gap is currently stalling the buffer.
    pub fn has_gap(&self) -> bool {
        !self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MessageId;
    use proptest::prelude::*;

    const ID: MessageId = MessageId(1);

    fn buffer() -> SequencedBuffer {
        SequencedBuffer::new(32, 1024 * 1024, Duration::from_millis(500))
    }

    #[test]
    fn test_in_order_append() {
        let mut buf = buffer();
        let now = Instant::now();
        let range = buf.ingest(Chunk::new(ID, 0, "Hello"), now).unwrap();
        assert_eq!(range, AppendedRange { start: 0, end: 5 });
        buf.ingest(Chunk::new(ID, 1, ", world"), now).unwrap();
        assert_eq!(buf.content(), "Hello, world");
        assert_eq!(buf.next_expected(), 2);
    }

    #[test]
    fn test_out_of_order_drain() {
        // Spec scenario: seq=0 "Hel", seq=2 "o!", seq=1 "l".
        let mut buf = buffer();
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 0, "Hel"), now).unwrap();
        assert_eq!(buf.content(), "Hel");

        let range = buf.ingest(Chunk::new(ID, 2, "o!"), now).unwrap();
        assert!(range.is_empty());
        assert_eq!(buf.content(), "Hel");
        assert_eq!(buf.held_len(), 1);

        let range = buf.ingest(Chunk::new(ID, 1, "l"), now).unwrap();
        assert_eq!(range.len(), 3); // "l" plus drained "o!"
        assert_eq!(buf.content(), "Hello!");
        assert_eq!(buf.held_len(), 0);
    }

    #[test]
    fn test_duplicate_applied_rejected() {
        let mut buf = buffer();
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 0, "a"), now).unwrap();
        let err = buf.ingest(Chunk::new(ID, 0, "a"), now).unwrap_err();
        assert_eq!(err, BufferError::DuplicateChunk { sequence: 0 });
        assert_eq!(buf.content(), "a");
    }

    #[test]
    fn test_duplicate_held_rejected() {
        let mut buf = buffer();
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 5, "later"), now).unwrap();
        let err = buf.ingest(Chunk::new(ID, 5, "later"), now).unwrap_err();
        assert_eq!(err, BufferError::DuplicateChunk { sequence: 5 });
        assert_eq!(buf.held_len(), 1);
    }

    #[test]
    fn test_gap_skipped_after_timeout() {
        let mut buf = SequencedBuffer::new(32, 1024, Duration::ZERO);
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 0, "a"), now).unwrap();
        // Gap at seq 1; zero timeout means the skip happens immediately.
        let range = buf.ingest(Chunk::new(ID, 2, "c"), now).unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(buf.content(), "ac");
        assert_eq!(buf.next_expected(), 3);
    }

    #[test]
    fn test_gap_holds_until_poll() {
        let mut buf = SequencedBuffer::new(32, 1024, Duration::from_millis(500));
        let start = Instant::now();
        buf.ingest(Chunk::new(ID, 0, "a"), start).unwrap();
        buf.ingest(Chunk::new(ID, 2, "c"), start).unwrap();
        assert_eq!(buf.content(), "a");

        // Not yet expired.
        let range = buf.poll_gap(start + Duration::from_millis(100));
        assert!(range.is_empty());

        // Expired: gap is skipped, held chunk drains.
        let range = buf.poll_gap(start + Duration::from_millis(600));
        assert_eq!(range.len(), 1);
        assert_eq!(buf.content(), "ac");
    }

    #[test]
    fn test_holding_capacity_drops_oldest() {
        let mut buf = SequencedBuffer::new(2, 1024, Duration::from_secs(10));
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 2, "b"), now).unwrap();
        buf.ingest(Chunk::new(ID, 3, "c"), now).unwrap();
        buf.ingest(Chunk::new(ID, 4, "d"), now).unwrap();
        assert_eq!(buf.held_len(), 2);

        // seq 2 was dropped; filling the gap drains only 3 and 4.
        buf.ingest(Chunk::new(ID, 0, "0"), now).unwrap();
        buf.ingest(Chunk::new(ID, 1, "1"), now).unwrap();
        assert_eq!(buf.content(), "01");
        assert_eq!(buf.held_len(), 2);
    }

    #[test]
    fn test_overflow_truncates_head() {
        let mut buf = SequencedBuffer::new(32, 8, Duration::ZERO);
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 0, "0123456789"), now).unwrap();
        assert_eq!(buf.content(), "23456789");
        assert!(buf.is_truncated());
        assert_eq!(buf.truncation_epoch(), 1);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let mut buf = SequencedBuffer::new(32, 4, Duration::ZERO);
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 0, "日本語"), now).unwrap();
        // 9 bytes of content against a 4-byte cap; the cut lands on a
        // char boundary so at most one full character remains.
        assert_eq!(buf.content(), "語");
        assert!(buf.is_truncated());
    }

    #[test]
    fn test_final_chunk_completes() {
        let mut buf = buffer();
        let now = Instant::now();
        buf.ingest(Chunk::new(ID, 0, "done"), now).unwrap();
        buf.ingest(Chunk::final_chunk(ID, 1, "."), now).unwrap();
        assert!(buf.is_complete());
        assert_eq!(buf.content(), "done.");

        let err = buf.ingest(Chunk::new(ID, 2, "late"), now).unwrap_err();
        assert_eq!(err, BufferError::MessageComplete { sequence: 2 });
    }

    #[test]
    fn test_final_chunk_out_of_order() {
        let mut buf = buffer();
        let now = Instant::now();
        buf.ingest(Chunk::final_chunk(ID, 2, "!"), now).unwrap();
        assert!(!buf.is_complete());
        buf.ingest(Chunk::new(ID, 0, "Hi"), now).unwrap();
        buf.ingest(Chunk::new(ID, 1, " there"), now).unwrap();
        assert!(buf.is_complete());
        assert_eq!(buf.content(), "Hi there!");
    }

    proptest! {
        /// Any arrival order of a gap-free sequence set materializes the
        /// same content.
        #[test]
        fn prop_reordering_is_idempotent(order in Just((0u64..12).collect::<Vec<_>>()).prop_shuffle()) {
            let mut buf = SequencedBuffer::new(32, 1024 * 1024, Duration::from_secs(10));
            let now = Instant::now();
            for seq in order {
                let _ = buf.ingest(Chunk::new(ID, seq, format!("[{seq}]")), now);
            }
            let expected: String = (0..12).map(|s| format!("[{s}]")).collect();
            prop_assert_eq!(buf.content(), expected.as_str());
        }

        /// Ingesting the same (message, sequence) twice leaves the same
        /// buffer state as ingesting it once.
        #[test]
        fn prop_duplicates_are_inert(dup in 0u64..8) {
            let now = Instant::now();
            let feed = |duplicate: bool| {
                let mut buf = SequencedBuffer::new(32, 1024 * 1024, Duration::from_secs(10));
                for seq in 0..8u64 {
                    buf.ingest(Chunk::new(ID, seq, format!("{seq}")), now).unwrap();
                    if duplicate && seq == dup {
                        let _ = buf.ingest(Chunk::new(ID, seq, format!("{seq}")), now);
                    }
                }
                buf.content().to_string()
            };
            prop_assert_eq!(feed(false), feed(true));
        }
    }
}
