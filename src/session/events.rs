//! Outbound events: the pipeline's side of the toolkit boundary.
//!
//! The core never assumes a UI thread. Everything the visual toolkit
//! needs arrives through one delivery channel of [`SessionEvent`]s; the
//! integration layer dispatches them onto whatever thread it draws from.

use std::sync::Arc;

use crate::error::RenderError;
use crate::ingest::MessageId;
use crate::render::RenderResult;

/// Events delivered to the visual-toolkit collaborator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A render result is ready to apply: styled content plus its
    /// measured height.
    RenderReady {
        /// The row the result belongs to.
        message_id: MessageId,
        /// Styled, measured output.
        result: Arc<RenderResult>,
        /// The row's new target height.
        height: u32,
    },

    /// A row's visible height changed, either from a fresh estimate or a
    /// step of a smoothed height transition.
    HeightChanged {
        /// The row whose height changed.
        message_id: MessageId,
        /// The currently visible height.
        height: u32,
    },

    /// The view should scroll to the newest content. Emitted only while
    /// follow mode is on.
    ScrollToBottomRequested {
        /// The row that grew.
        message_id: MessageId,
    },

    /// A render failed. Never terminal for the row when the reason is
    /// recoverable: a fallback render follows.
    RenderFailed {
        /// The affected row.
        message_id: MessageId,
        /// Why the render failed.
        reason: RenderError,
    },

    /// A message finished streaming and its final height is committed.
    Settled {
        /// The settled row.
        message_id: MessageId,
        /// The final committed height.
        height: u32,
    },

    /// A session was evicted under memory pressure; its row state is gone.
    Evicted {
        /// The evicted row.
        message_id: MessageId,
    },
}
