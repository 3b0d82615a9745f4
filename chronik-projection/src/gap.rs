use chrono::{DateTime, Duration, Utc};

/// Policy for handling holes in the assigned `no` sequence of a stream.
///
/// A gap can mean an earlier transaction is still uncommitted (worth a short
/// wait) or a rolled-back transaction left a permanent hole (not worth any).
/// Retries walk the sleep ladder; the optional detection window suppresses
/// retries entirely for events older than the window, where only permanent
/// holes remain.
#[derive(Debug, Clone)]
pub struct GapDetection {
    retry_config: Vec<u64>,
    detection_window: Option<Duration>,
    retries: usize,
}

impl Default for GapDetection {
    fn default() -> Self {
        Self {
            retry_config: vec![0, 5, 50, 500],
            detection_window: None,
            retries: 0,
        }
    }
}

impl GapDetection {
    /// `retry_config` holds the sleep duration in milliseconds per retry.
    pub fn new(retry_config: Vec<u64>) -> Self {
        Self {
            retry_config,
            ..Self::default()
        }
    }

    pub fn detection_window(mut self, window: Duration) -> Self {
        self.detection_window = Some(window);

        self
    }

    pub fn is_gap(&self, previous_position: i64, event_position: i64) -> bool {
        event_position != previous_position + 1
    }

    pub fn should_retry(&self, now: DateTime<Utc>, event_created_at: DateTime<Utc>) -> bool {
        if let Some(window) = self.detection_window {
            if now - event_created_at > window {
                return false;
            }
        }

        self.retries < self.retry_config.len()
    }

    pub fn sleep_ms(&self) -> u64 {
        self.retry_config.get(self.retries).copied().unwrap_or(0)
    }

    pub fn track_retry(&mut self) {
        self.retries += 1;
    }

    pub fn reset_retries(&mut self) {
        self.retries = 0;
    }
}
