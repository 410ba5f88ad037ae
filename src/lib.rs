//! # Cascade
//!
//! A streaming render pipeline for chat-style UIs.
//!
//! Cascade turns an unbounded stream of small content fragments (think
//! token-by-token model output) into smoothly updating, variable-height
//! rows: no starved UI thread, no unbounded buffers, no jumping scroll
//! position.
//!
//! ## Core Concepts
//!
//! - **Sequenced ingestion**: out-of-order and duplicated chunks resolve
//!   into one append-only buffer per message
//! - **Adaptive scheduling**: render cadence stretches under load instead
//!   of dropping content
//! - **Leased render surfaces**: expensive embedded renderers live in a
//!   bounded, self-healing pool
//! - **Layout coordination**: measured heights animate in, and the view
//!   follows the newest content only while the user lets it
//!
//! ## Example
//!
//! ```rust,ignore
//! use cascade::{Chunk, MessageId, StreamEngine};
//!
//! let mut engine = StreamEngine::new(80);
//! engine.ingest(Chunk::new(MessageId(1), 0, "Hello, "))?;
//! engine.ingest(Chunk::final_chunk(MessageId(1), 1, "world!"))?;
//!
//! // On your UI tick:
//! engine.pump(std::time::Instant::now());
//! for event in engine.events().try_iter() {
//!     // apply styled rows / heights / scroll requests
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod ingest;
pub mod layout;
pub mod render;
pub mod schedule;
pub mod session;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use error::{BufferError, Error, RenderError, Result};
pub use ingest::{Chunk, FlushPolicy, FlushReason, MessageId, SequencedBuffer};
pub use layout::{HeightPredictor, LayoutCoordinator};
pub use render::{
    ContentClass, MeasuredSize, RenderCache, RenderContextPool, RenderResult, RenderableUnit,
    StyledLine, StyledSpan, SurfaceKind,
};
pub use schedule::{RenderScheduler, Semaphore};
pub use session::{PipelineStats, SessionEvent, SessionState, StreamEngine, StreamSession};
