//! Pipeline configuration.
//!
//! All tuning knobs for the streaming pipeline live in one plain struct
//! with sensible defaults. There is no config DSL; construct with struct
//! update syntax:
//!
//! ```
//! use cascade::PipelineConfig;
//!
//! let config = PipelineConfig {
//!     flush_size_threshold: 64,
//!     ..PipelineConfig::default()
//! };
//! assert_eq!(config.pool_capacity, 5);
//! ```

use std::time::Duration;

/// Configuration for the streaming render pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Buffered characters since the last flush that force a flush.
    pub flush_size_threshold: usize,
    /// Maximum time buffered content may wait before a flush, so slow
    /// trickles still show visible progress.
    pub flush_max_wait: Duration,
    /// Base interval between renders of the same message.
    pub base_render_interval: Duration,
    /// Lower clamp on the adaptive render interval.
    pub min_render_interval: Duration,
    /// Upper clamp on the adaptive render interval.
    pub max_render_interval: Duration,
    /// Render cost above which the adaptive interval starts stretching.
    pub render_cost_budget: Duration,
    /// Global cap on concurrently executing renders across all messages.
    pub max_concurrent_renders: usize,
    /// Number of render worker threads.
    pub worker_threads: usize,
    /// Number of reusable embedded render surfaces in the pool.
    pub pool_capacity: usize,
    /// How long a render waits for a pooled surface before falling back.
    pub pool_acquire_timeout: Duration,
    /// Deadline for one embedded-surface render.
    pub surface_timeout: Duration,
    /// Cap on materialized content bytes per message; the oldest prefix is
    /// truncated beyond this.
    pub buffer_cap_bytes: usize,
    /// Cap on out-of-order chunks held per message.
    pub holding_capacity: usize,
    /// How long a sequence gap may stall the buffer before it is skipped.
    pub gap_timeout: Duration,
    /// Height deltas below this many row units apply without animation.
    pub height_noise_threshold: u32,
    /// Animation time per row unit of height delta.
    pub animation_per_unit: Duration,
    /// Upper cap on one height animation.
    pub max_animation: Duration,
    /// Viewport distance from the bottom within which follow mode re-engages.
    pub follow_reengage_distance: u32,
    /// Cap on memoized render results.
    pub cache_capacity: usize,
    /// Cap on live sessions before the least-recently-active is evicted.
    pub max_sessions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_size_threshold: 100,
            flush_max_wait: Duration::from_millis(150),
            base_render_interval: Duration::from_millis(50),
            min_render_interval: Duration::from_millis(16),
            max_render_interval: Duration::from_millis(500),
            render_cost_budget: Duration::from_millis(16),
            max_concurrent_renders: 3,
            worker_threads: 4,
            pool_capacity: 5,
            pool_acquire_timeout: Duration::from_millis(250),
            surface_timeout: Duration::from_secs(3),
            buffer_cap_bytes: 1024 * 1024,
            holding_capacity: 32,
            gap_timeout: Duration::from_millis(500),
            height_noise_threshold: 2,
            animation_per_unit: Duration::from_millis(8),
            max_animation: Duration::from_millis(240),
            follow_reengage_distance: 32,
            cache_capacity: 256,
            max_sessions: 64,
        }
    }
}
