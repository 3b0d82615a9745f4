use std::sync::Arc;
use std::time::Duration;

use crate::gap::GapDetection;

/// Tuning knobs shared by projectors and read-model projectors.
#[derive(Clone)]
pub struct ProjectorOptions {
    pub(crate) lock_timeout: Duration,
    pub(crate) sleep: Duration,
    pub(crate) persist_block_size: usize,
    pub(crate) update_lock_threshold: Duration,
    pub(crate) cache_size: usize,
    pub(crate) load_count: Option<i64>,
    pub(crate) gap_detection: Option<GapDetection>,
    pub(crate) signal_hook: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for ProjectorOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectorOptions {
    pub fn new() -> Self {
        Self {
            lock_timeout: Duration::from_millis(1000),
            sleep: Duration::from_micros(100_000),
            persist_block_size: 1000,
            update_lock_threshold: Duration::ZERO,
            cache_size: 1000,
            load_count: None,
            gap_detection: None,
            signal_hook: None,
        }
    }

    /// Length of each lease renewal window.
    pub fn lock_timeout_ms(mut self, millis: u64) -> Self {
        self.lock_timeout = Duration::from_millis(millis);

        self
    }

    /// Idle-cycle sleep, in microseconds.
    pub fn sleep(mut self, micros: u64) -> Self {
        self.sleep = Duration::from_micros(micros);

        self
    }

    /// Number of events between persistence checkpoints.
    pub fn persist_block_size(mut self, size: usize) -> Self {
        self.persist_block_size = size.max(1);

        self
    }

    /// Minimum milliseconds between lease refreshes during idle cycles.
    pub fn update_lock_threshold_ms(mut self, millis: u64) -> Self {
        self.update_lock_threshold = Duration::from_millis(millis);

        self
    }

    /// Capacity of the emitted-stream existence cache.
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size.max(1);

        self
    }

    /// Maximum events loaded per stream per cycle; unbounded when `None`.
    pub fn load_count(mut self, count: Option<i64>) -> Self {
        self.load_count = count;

        self
    }

    pub fn gap_detection(mut self, gap: GapDetection) -> Self {
        self.gap_detection = Some(gap);

        self
    }

    /// Callback invoked between events, for cooperative signal dispatch.
    pub fn signal_hook<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.signal_hook = Some(Arc::new(hook));

        self
    }
}
