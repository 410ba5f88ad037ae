//! Adaptive render scheduling.
//!
//! Each message renders at most once per adaptive interval:
//! `clamp(base * cost_factor, min, max)`, where the cost factor follows a
//! smoothed average of recent render costs against a frame budget. Under
//! load the pipeline degrades to fewer, larger updates instead of
//! dropping content.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::ingest::MessageId;

/// Floor of the cost factor, so cheap renders still speed up the cadence.
const MIN_COST_FACTOR: f64 = 0.25;

#[derive(Debug, Default)]
struct ScheduleEntry {
    last_render: Option<Instant>,
    /// Smoothed render cost in microseconds, zero until the first render.
    avg_cost_us: u64,
    /// A render for this message is currently queued or executing.
    in_flight: bool,
}

/// Per-message render admission.
#[derive(Debug)]
pub struct RenderScheduler {
    base: Duration,
    min: Duration,
    max: Duration,
    budget: Duration,
    entries: HashMap<MessageId, ScheduleEntry>,
}

impl RenderScheduler {
    /// Create a scheduler from the pipeline configuration.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            base: config.base_render_interval,
            min: config.min_render_interval,
            max: config.max_render_interval,
            budget: config.render_cost_budget.max(Duration::from_micros(1)),
            entries: HashMap::new(),
        }
    }

    /// Whether a render for this message may start now.
    ///
    /// Renders for the same message never overlap; a message with a
    /// render in flight is not admitted again until the result lands.
    pub fn should_render_now(&self, id: MessageId, now: Instant) -> bool {
        let Some(entry) = self.entries.get(&id) else {
            return true;
        };
        if entry.in_flight {
            return false;
        }
        match entry.last_render {
            None => true,
            Some(last) => now.duration_since(last) >= self.adaptive_interval(id),
        }
    }

    /// The current adaptive interval for a message.
    pub fn adaptive_interval(&self, id: MessageId) -> Duration {
        let avg_us = self
            .entries
            .get(&id)
            .map_or(0, |entry| entry.avg_cost_us);
        if avg_us == 0 {
            return self.base.clamp(self.min, self.max);
        }
        let budget_us = self.budget.as_micros().max(1) as f64;
        let factor = (avg_us as f64 / budget_us).max(MIN_COST_FACTOR);
        self.base.mul_f64(factor).clamp(self.min, self.max)
    }

    /// Mark a render as admitted; blocks further admission for the message.
    pub fn begin_render(&mut self, id: MessageId) {
        self.entries.entry(id).or_default().in_flight = true;
    }

    /// Record a finished render and its measured cost.
    pub fn record_render(&mut self, id: MessageId, now: Instant, cost: Duration) {
        let entry = self.entries.entry(id).or_default();
        entry.in_flight = false;
        entry.last_render = Some(now);
        let cost_us = u64::try_from(cost.as_micros()).unwrap_or(u64::MAX);
        // Same smoothing as the render-stats average: 1/16 of the new cost.
        entry.avg_cost_us = if entry.avg_cost_us == 0 {
            cost_us
        } else {
            (entry.avg_cost_us * 15 + cost_us) / 16
        };
    }

    /// Whether a render for the message is queued or executing.
    pub fn in_flight(&self, id: MessageId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.in_flight)
    }

    /// Drop all scheduling state for a message.
    pub fn remove(&mut self, id: MessageId) {
        self.entries.remove(&id);
    }
}
