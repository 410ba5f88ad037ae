//! Scheduling: adaptive render pacing and off-thread execution.
//!
//! [`RenderScheduler`] decides *when* a message may render again;
//! [`Semaphore`] bounds *how many* renders run at once across all
//! messages; [`RenderWorkers`] are the threads renders actually run on.

mod scheduler;
mod semaphore;
mod worker;

pub use scheduler::RenderScheduler;
pub use semaphore::{Permit, Semaphore};
pub use worker::{RenderJob, RenderOutcome, RenderWorkers};
