//! Layout coordination: committed heights, smoothed transitions, and
//! scroll-follow state.
//!
//! The coordinator owns what the toolkit believes about each row: its
//! current height, its latest render result, and whether the view should
//! stay pinned to the newest content. Height changes below a noise
//! threshold apply instantly; larger jumps animate over a duration
//! proportional to the delta, capped. Renders are committed in increasing
//! content-length order: a late-arriving render of a shorter prefix never
//! regresses the row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::PipelineConfig;
use crate::ingest::MessageId;
use crate::render::RenderResult;

/// An in-progress smoothed height change.
#[derive(Debug, Clone, Copy)]
pub struct HeightTransition {
    from: u32,
    to: u32,
    started: Instant,
    duration: Duration,
}

impl HeightTransition {
    /// Interpolated height at `now`.
    pub fn value_at(&self, now: Instant) -> u32 {
        if self.duration.is_zero() {
            return self.to;
        }
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.duration {
            return self.to;
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let from = f64::from(self.from);
        let to = f64::from(self.to);
        (from + (to - from) * t).round().max(0.0) as u32
    }

    /// Whether the transition has reached its target.
    pub fn is_done(&self, now: Instant) -> bool {
        self.value_at(now) == self.to
    }
}

/// What happened to a committed render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The render was applied to the row.
    Applied {
        /// The new target height.
        height: u32,
        /// Whether the height change is animating.
        animated: bool,
        /// Whether a scroll-to-bottom should be requested.
        scroll_to_bottom: bool,
    },
    /// The render's content was a stale prefix of what is already shown.
    DiscardedStale,
}

#[derive(Debug, Default)]
struct RowState {
    target_height: u32,
    transition: Option<HeightTransition>,
    result: Option<Arc<RenderResult>>,
    committed_source_len: usize,
    /// Height last handed to the consumer via `advance`.
    last_reported: Option<u32>,
}

/// Owns per-row heights, results, and the scroll-follow flag.
#[derive(Debug)]
pub struct LayoutCoordinator {
    rows: HashMap<MessageId, RowState>,
    /// The newest tracked row; scroll-follow pins to this one.
    latest: Option<MessageId>,
    follow_latest: bool,
    noise_threshold: u32,
    animation_per_unit: Duration,
    max_animation: Duration,
    reengage_distance: u32,
}

impl LayoutCoordinator {
    /// Create a coordinator from the pipeline configuration.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            rows: HashMap::new(),
            latest: None,
            follow_latest: true,
            noise_threshold: config.height_noise_threshold,
            animation_per_unit: config.animation_per_unit,
            max_animation: config.max_animation,
            reengage_distance: config.follow_reengage_distance,
        }
    }

    /// Register a row; the most recently tracked row is the one
    /// scroll-follow pins to.
    pub fn track(&mut self, id: MessageId) {
        self.rows.entry(id).or_default();
        self.latest = Some(id);
    }

    /// Apply a predicted height before any real measurement exists.
    ///
    /// Estimates apply instantly and never animate; a real result always
    /// overrides them. Returns whether the row's height changed.
    pub fn commit_estimate(&mut self, id: MessageId, height: u32) -> bool {
        let row = self.rows.entry(id).or_default();
        if row.result.is_some() || row.target_height == height {
            return false;
        }
        row.target_height = height;
        true
    }

    /// Commit a render result to its row.
    pub fn commit(&mut self, id: MessageId, result: Arc<RenderResult>, now: Instant) -> Commit {
        let follow = self.follow_latest;
        let is_latest = self.latest == Some(id);
        let noise = self.noise_threshold;
        let per_unit = self.animation_per_unit;
        let max_animation = self.max_animation;

        let row = self.rows.entry(id).or_default();

        // Out-of-order completion guard: a render of a strict content
        // prefix would visually rewind the row. The final render always
        // lands so a completed message can still shrink to exact size.
        if row.result.is_some()
            && result.source_len < row.committed_source_len
            && !result.is_complete
        {
            debug!(message_id = %id, "discarding stale prefix render");
            return Commit::DiscardedStale;
        }

        let old_height = row.current_height(now);
        let new_height = result.size.height;
        let delta = new_height.abs_diff(old_height);

        let animated = delta >= noise.max(1);
        if animated {
            let duration = per_unit
                .saturating_mul(delta)
                .min(max_animation);
            row.transition = Some(HeightTransition {
                from: old_height,
                to: new_height,
                started: now,
                duration,
            });
        } else {
            row.transition = None;
            row.last_reported = None;
        }
        // Growth is judged against the last *measured* height; the
        // provisional estimate does not count as something to beat.
        let grew = row
            .result
            .as_ref()
            .map_or(new_height > 0, |r| new_height > r.size.height);
        row.target_height = new_height;
        row.committed_source_len = result.source_len;
        row.result = Some(result);

        Commit::Applied {
            height: new_height,
            animated,
            scroll_to_bottom: follow && is_latest && grew,
        }
    }

    /// Advance animations, returning rows whose visible height changed.
    pub fn advance(&mut self, now: Instant) -> Vec<(MessageId, u32)> {
        let mut changed = Vec::new();
        for (id, row) in &mut self.rows {
            let Some(transition) = row.transition else {
                continue;
            };
            let height = transition.value_at(now);
            if row.last_reported != Some(height) {
                row.last_reported = Some(height);
                changed.push((*id, height));
            }
            if transition.is_done(now) {
                row.transition = None;
            }
        }
        changed.sort_by_key(|(id, _)| *id);
        changed
    }

    /// The row's currently visible height (mid-animation value).
    pub fn height(&self, id: MessageId, now: Instant) -> Option<u32> {
        self.rows.get(&id).map(|row| row.current_height(now))
    }

    /// The row's committed target height.
    pub fn target_height(&self, id: MessageId) -> Option<u32> {
        self.rows.get(&id).map(|row| row.target_height)
    }

    /// The row's latest committed render result.
    pub fn result(&self, id: MessageId) -> Option<&Arc<RenderResult>> {
        self.rows.get(&id).and_then(|row| row.result.as_ref())
    }

    /// Report the viewport's distance from the bottom.
    ///
    /// Follow mode drops the instant the viewport moves beyond the
    /// re-engage distance and returns only once it is back within it.
    pub fn viewport_moved(&mut self, distance_from_bottom: u32) {
        self.follow_latest = distance_from_bottom <= self.reengage_distance;
    }

    /// Whether the view is pinned to the newest content.
    pub const fn follow_latest(&self) -> bool {
        self.follow_latest
    }

    /// Drop all state for a row.
    pub fn remove(&mut self, id: MessageId) {
        self.rows.remove(&id);
        if self.latest == Some(id) {
            self.latest = None;
        }
    }

    /// Number of tracked rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows are tracked.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowState {
    fn current_height(&self, now: Instant) -> u32 {
        self.transition
            .as_ref()
            .map_or(self.target_height, |t| t.value_at(now))
    }
}
