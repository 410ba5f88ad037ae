//! Height prediction from partial content.
//!
//! Before a real measurement exists, a row's height is estimated from
//! per-content-class history: a smoothed height-per-character plus a fixed
//! structural overhead. Every real measurement corrects the history, so
//! estimates tighten as the session runs.

use std::collections::HashMap;

use crate::render::ContentClass;

/// Smoothing factor for the per-class average.
const EWMA_ALPHA: f64 = 0.125;

/// Height-per-character assumed for a class never measured before.
/// Roughly one row per 64 characters, a sane prior for chat-width rows.
const DEFAULT_HEIGHT_PER_CHAR: f64 = 1.0 / 64.0;

#[derive(Debug, Clone, Copy)]
struct ClassStats {
    height_per_char: f64,
    samples: u64,
}

/// Predicts row heights from partial content.
#[derive(Debug)]
pub struct HeightPredictor {
    stats: HashMap<ContentClass, ClassStats>,
    /// Baseline rows every rendered message occupies.
    overhead: u32,
}

impl Default for HeightPredictor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl HeightPredictor {
    /// Create a predictor with the given structural overhead in rows.
    pub fn new(overhead: u32) -> Self {
        Self {
            stats: HashMap::new(),
            overhead,
        }
    }

    /// Estimate the height of `char_count` characters of `class` content.
    pub fn estimate(&self, class: ContentClass, char_count: usize) -> u32 {
        let height_per_char = self
            .stats
            .get(&class)
            .map_or(DEFAULT_HEIGHT_PER_CHAR, |s| s.height_per_char);
        let content_rows = (height_per_char * char_count as f64).ceil();
        let content_rows = if content_rows.is_finite() && content_rows >= 0.0 {
            content_rows.min(f64::from(u32::MAX)) as u32
        } else {
            0
        };
        self.overhead.max(1).saturating_add(content_rows).max(1)
    }

    /// Correct the history with a real measurement.
    pub fn observe(&mut self, class: ContentClass, char_count: usize, measured_height: u32) {
        if char_count == 0 {
            return;
        }
        let extra_rows = measured_height.saturating_sub(self.overhead.max(1));
        let sample = f64::from(extra_rows) / char_count as f64;
        self.stats
            .entry(class)
            .and_modify(|s| {
                s.height_per_char = s.height_per_char * (1.0 - EWMA_ALPHA) + sample * EWMA_ALPHA;
                s.samples += 1;
            })
            .or_insert(ClassStats {
                height_per_char: sample,
                samples: 1,
            });
    }

    /// Number of measurements recorded for a class.
    pub fn samples(&self, class: ContentClass) -> u64 {
        self.stats.get(&class).map_or(0, |s| s.samples)
    }
}
