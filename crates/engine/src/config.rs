//! Engine configuration.

use std::time::Duration;

use talon_core::RetryPolicy;

/// Tunables for the engine and its scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the scheduler checks for eligible work.
    pub tick_interval: Duration,
    /// Retry classification and budget defaults.
    pub retry: RetryPolicy,
    /// How long confirmed transactions are kept before the housekeeping
    /// sweep deletes them.
    pub confirmed_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            confirmed_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl EngineConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_confirmed_retention(mut self, retention: Duration) -> Self {
        self.confirmed_retention = retention;
        self
    }
}
