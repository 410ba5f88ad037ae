//! Error types for the streaming render pipeline.
//!
//! Every error in this crate is scoped to a single message: an ingest or
//! render failure never crosses over into another concurrently streaming
//! message. The worst recoverable outcome is a row that keeps showing its
//! last successfully rendered state.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for pipeline operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Ingestion/sequencing errors.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Render-path errors.
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

/// Errors surfaced by [`crate::ingest::SequencedBuffer::ingest`].
///
/// These are recoverable by contract: the caller logs and drops the chunk,
/// the buffer state is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The chunk's sequence number was already applied or is already held.
    #[error("duplicate chunk: sequence {sequence} already received")]
    DuplicateChunk {
        /// Sequence number of the rejected chunk.
        sequence: u64,
    },

    /// A chunk arrived after the final chunk was applied.
    #[error("chunk after completion: sequence {sequence} ignored")]
    MessageComplete {
        /// Sequence number of the rejected chunk.
        sequence: u64,
    },
}

/// Errors from the render path.
///
/// All variants except [`RenderError::Fatal`] degrade to a plain-text
/// fallback render of the same content; `Fatal` is surfaced to the UI as an
/// error state for that one message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// An embedded-surface render did not finish within its deadline.
    #[error("render timed out after {waited:?}")]
    Timeout {
        /// How long the render ran before being abandoned.
        waited: Duration,
    },

    /// No pooled render context became free within the acquire timeout.
    #[error("render context pool exhausted after waiting {waited:?}")]
    PoolExhausted {
        /// How long the caller waited for a lease.
        waited: Duration,
    },

    /// A pooled context errored irrecoverably and was destroyed.
    #[error("render context fault: {0}")]
    ContextFault(String),

    /// The render failed and no fallback was possible.
    #[error("irrecoverable render error: {0}")]
    Fatal(String),
}

impl RenderError {
    /// Whether the plain-text fallback path applies to this error.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}
