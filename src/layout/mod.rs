//! Layout: height prediction and row-height coordination.
//!
//! [`HeightPredictor`] guesses a row's height before any measurement
//! exists; [`LayoutCoordinator`] owns what the toolkit believes about
//! each row and the single most important UX invariant of the pipeline:
//! never steal the scroll position from a user who scrolled away.

mod coordinator;
mod predictor;

pub use coordinator::{Commit, HeightTransition, LayoutCoordinator};
pub use predictor::HeightPredictor;
