//! Rendering: content classes, renderers, memoization and surface pooling.
//!
//! The renderer boundary is a closed dispatch over [`ContentClass`]:
//!
//! - [`TextRenderer`] handles plain and markup text synchronously, with
//!   exact `unicode-width` measurement. It is also the fallback for every
//!   failed expensive render.
//! - [`RenderSurface`] handles embedded-surface content through a leased
//!   `vt100` grid, under a deadline.
//!
//! Both paths are memoized in a shared [`RenderCache`] keyed by
//! `(content fingerprint, constraint width)`.

mod cache;
mod pool;
mod style;
mod surface;
mod text;
mod unit;

pub use cache::{CacheKey, RenderCache};
pub use pool::{RenderContextPool, SurfaceLease};
pub use style::{Modifiers, Rgb, SpanStyle, StyledLine, StyledSpan};
pub use surface::RenderSurface;
pub use text::{TextRenderer, TRUNCATION_MARKER};
pub use unit::{ContentClass, MeasuredSize, RenderResult, RenderableUnit, SurfaceKind};
