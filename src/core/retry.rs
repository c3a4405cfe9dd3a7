//! Automatic retry policy with exponential backoff
//!
//! The dispatcher consults this policy after each failed attempt. Attempts
//! for one destination key are always sequential: the next attempt is only
//! scheduled once the previous one has been merged into the campaign log.

use crate::core::log_state::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Maximum number of attempts per destination, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether a timed-out attempt may be retried
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt should follow a failure of `kind`
    ///
    /// `attempts_so_far` counts attempts made in the current dispatch round.
    pub fn should_retry(&self, kind: Option<ErrorKind>, attempts_so_far: u32) -> bool {
        if attempts_so_far >= self.max_attempts {
            return false;
        }

        match kind {
            Some(ErrorKind::Resolution) => false,
            Some(ErrorKind::Timeout) => self.retry_on_timeout,
            Some(ErrorKind::Execution) | None => true,
        }
    }

    /// Backoff before retry number `retry` (1 = first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);

        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 250,
            backoff_multiplier: 2.0,
            retry_on_timeout: false,
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let options = RetryPolicy::default();

        assert_eq!(options.max_attempts, 1);
        assert_eq!(options.initial_delay_ms, 1_000);
        assert_eq!(options.max_delay_ms, 30_000);
        assert_eq!(options.backoff_multiplier, 2.0);
        assert!(!options.should_retry(Some(ErrorKind::Execution), 1));
    }

    #[test]
    fn test_execution_failures_retry_until_max() {
        let policy = policy(3);

        assert!(policy.should_retry(Some(ErrorKind::Execution), 1));
        assert!(policy.should_retry(Some(ErrorKind::Execution), 2));
        assert!(!policy.should_retry(Some(ErrorKind::Execution), 3));
    }

    #[test]
    fn test_resolution_failures_never_retry() {
        assert!(!policy(5).should_retry(Some(ErrorKind::Resolution), 1));
    }

    #[test]
    fn test_timeout_retry_is_configurable() {
        let mut policy = policy(3);
        assert!(!policy.should_retry(Some(ErrorKind::Timeout), 1));

        policy.retry_on_timeout = true;
        assert!(policy.should_retry(Some(ErrorKind::Timeout), 1));
    }

    #[test]
    fn test_exponential_backoff_with_cap() {
        let policy = policy(5);

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
        assert_eq!(policy.delay_for(30), Duration::from_millis(250));
    }

    #[test]
    fn test_deserialize_partial_policy() {
        let policy: RetryPolicy =
            serde_yaml::from_str("maxAttempts: 4\nretryOnTimeout: false\n").unwrap();

        assert_eq!(policy.max_attempts, 4);
        assert!(!policy.retry_on_timeout);
        assert_eq!(policy.initial_delay_ms, 1_000);
    }
}
