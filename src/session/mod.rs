//! Sessions: per-message state machines and the top-level engine.
//!
//! A [`StreamSession`] is the glue for one message: buffer → flush policy
//! → scheduler → renderer. The [`StreamEngine`] owns all of them plus the
//! shared services, and talks to the outside world through
//! [`SessionEvent`]s.

mod engine;
mod events;
#[allow(clippy::module_inception)]
mod session;

pub use engine::{PipelineStats, StreamEngine};
pub use events::SessionEvent;
pub use session::{SessionState, StreamSession};
