use std::time::Duration;

/// Exponential backoff parameters.
///
/// `max_retries` counts the attempts made *after* the first one, so an
/// operation runs at most `max_retries + 1` times.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Proportional jitter applied to each delay, e.g. `0.1` for ±10%.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based), before jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let delay_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }
}
