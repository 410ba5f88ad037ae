//! Ingestion: chunk sequencing and flush decisions.
//!
//! The transport delivers [`Chunk`]s that may be reordered or redelivered.
//! Each message owns a [`SequencedBuffer`] that materializes exactly the
//! contiguous prefix of sequence numbers received so far, and a
//! [`FlushPolicy`] that decides when the buffered content is worth handing
//! to the renderer.

mod chunk;
mod flush;
mod sequenced;

pub use chunk::{AppendedRange, Chunk, MessageId};
pub use flush::{FlushPolicy, FlushReason};
pub use sequenced::SequencedBuffer;
