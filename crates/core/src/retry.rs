//! Retry budget and backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Automatic attempts a transaction gets before it is terminally failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Decides whether a failed attempt earns another automatic one.
///
/// Backoff here is budget-based, not timer-based: a retryable failure is
/// simply picked up again on the next scheduler tick until the budget is
/// exhausted. `backoff_hint` computes the exponential estimate that gets
/// logged for observability; it is not enforced as a hard delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Default retry budget for transactions that do not override it.
    pub max_retries: u32,
    /// Base delay for the logged backoff estimate.
    pub backoff_base: Duration,
    /// Cap for the logged backoff estimate.
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the engine should keep the transaction eligible after a
    /// failed attempt. `retry_count` is the attempts made so far,
    /// `max_retries` the budget fixed at that transaction's creation.
    pub fn should_retry(&self, error: &RemoteError, retry_count: u32, max_retries: u32) -> bool {
        error.is_retryable() && retry_count < max_retries
    }

    /// Exponential backoff estimate for a given attempt (1-indexed):
    /// `base * 2^(attempt - 1)`, capped.
    pub fn backoff_hint(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.backoff_base.as_millis() as u64;
        let cap_ms = self.backoff_cap.as_millis() as u64;
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1).min(63));
        Duration::from_millis(base_ms.saturating_mul(exp).min(cap_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_hint_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_hint(1), Duration::from_secs(5));
        assert_eq!(policy.backoff_hint(2), Duration::from_secs(10));
        assert_eq!(policy.backoff_hint(3), Duration::from_secs(20));
        assert_eq!(policy.backoff_hint(10), Duration::from_secs(300));
    }

    #[test]
    fn terminal_errors_never_retry() {
        let policy = RetryPolicy::default();
        let err = RemoteError::Client {
            status: 404,
            message: "gone".into(),
        };
        assert!(!policy.should_retry(&err, 0, 3));
    }

    #[test]
    fn budget_exhaustion_stops_retries() {
        let policy = RetryPolicy::default();
        let err = RemoteError::Server {
            status: 500,
            message: "boom".into(),
        };
        assert!(policy.should_retry(&err, 2, 3));
        assert!(!policy.should_retry(&err, 3, 3));
    }

    proptest! {
        #[test]
        fn hint_is_monotonic_and_capped(a in 1u32..64, b in 1u32..64) {
            let policy = RetryPolicy::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(policy.backoff_hint(lo) <= policy.backoff_hint(hi));
            prop_assert!(policy.backoff_hint(hi) <= policy.backoff_cap);
        }

        #[test]
        fn retryable_iff_budget_and_class(count in 0u32..10, max in 0u32..10) {
            let policy = RetryPolicy::default();
            let transient = RemoteError::Transport("reset".into());
            prop_assert_eq!(
                policy.should_retry(&transient, count, max),
                count < max
            );
        }
    }
}
