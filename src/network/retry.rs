//! Retry classification and backoff.

use crate::consts::client_consts::retry;
use crate::transport::TransportError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Automatic retries for a transient failure.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    /// Cap on any single delay, server hints included.
    pub max_delay_ms: u64,
    /// Upper bound of random delay added to each backoff; 0 disables jitter.
    pub jitter_ms: u64,
    pub offline_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            multiplier: retry::BACKOFF_MULTIPLIER,
            max_delay_ms: retry::MAX_DELAY_MS,
            jitter_ms: 0,
            offline_wait_ms: retry::OFFLINE_WAIT_MS,
        }
    }
}

/// Decides whether a failure is retried and how long to wait first.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn offline_wait(&self) -> Duration {
        Duration::from_millis(self.config.offline_wait_ms)
    }

    /// No status (network failure), 5xx or 429.
    pub fn is_transient(status: Option<u16>) -> bool {
        match status {
            None => true,
            Some(429) => true,
            Some(status) => status >= 500,
        }
    }

    pub fn should_retry(&self, error: &TransportError, attempt: u32, max_attempts: u32) -> bool {
        attempt < max_attempts && Self::is_transient(error.status())
    }

    /// Ceiling recorded on a new error record: non-retryable failures are terminal at once.
    pub fn max_attempts_for(&self, error: &TransportError) -> u32 {
        if Self::is_transient(error.status()) {
            self.config.max_attempts
        } else {
            0
        }
    }

    /// `base * multiplier^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.config.multiplier.max(1)).saturating_pow(attempt);
        let millis = self.config.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.config.max_delay_ms))
    }

    /// Delay before retry number `attempt + 1`. A server `Retry-After` replaces the computed
    /// backoff; either way the result never exceeds the cap.
    pub fn delay_for(&self, error: &TransportError, attempt: u32) -> Duration {
        let max_delay = Duration::from_millis(self.config.max_delay_ms);
        if let Some(hint) = error.retry_after() {
            return hint.min(max_delay);
        }
        let jitter = if self.config.jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.config.jitter_ms))
        } else {
            Duration::ZERO
        };
        (self.backoff(attempt) + jitter).min(max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> TransportError {
        TransportError::Http {
            status,
            message: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn test_transient_classification() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&TransportError::Connection("reset".into()), 0, 3));
        assert!(policy.should_retry(&TransportError::Timeout(Duration::from_secs(10)), 0, 3));
        assert!(policy.should_retry(&http(503), 2, 3));
        assert!(policy.should_retry(&http(429), 0, 3));

        // Client errors are never retried.
        assert!(!policy.should_retry(&http(422), 0, 3));
        assert!(!policy.should_retry(&http(400), 0, 3));
        assert!(!policy.should_retry(&http(401), 0, 3));
        assert!(!policy.should_retry(&http(404), 0, 3));
    }

    #[test]
    fn test_attempt_ceiling() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&http(500), 3, 3));
        assert!(!policy.should_retry(&http(500), 0, 0));
    }

    #[test]
    fn test_max_attempts_for_non_retryable_is_zero() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts_for(&http(422)), 0);
        assert_eq!(policy.max_attempts_for(&http(502)), retry::MAX_ATTEMPTS);
        assert_eq!(
            policy.max_attempts_for(&TransportError::Connection("down".into())),
            retry::MAX_ATTEMPTS
        );
    }

    #[test]
    fn test_backoff_grows_by_multiplier() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(3));
        assert_eq!(policy.backoff(2), Duration::from_secs(9));

        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = policy.backoff(attempt);
            assert!(delay >= previous, "backoff shrank at attempt {attempt}");
            assert!(delay <= retry::max_delay());
            previous = delay;
        }
        assert_eq!(policy.backoff(39), retry::max_delay());
    }

    #[test]
    fn test_retry_after_overrides_backoff_and_is_capped() {
        let policy = RetryPolicy::default();
        let hinted = TransportError::Http {
            status: 429,
            message: String::new(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(policy.delay_for(&hinted, 2), Duration::from_secs(7));

        let excessive = TransportError::Http {
            status: 503,
            message: String::new(),
            retry_after: Some(Duration::from_secs(24 * 60 * 60)),
        };
        assert_eq!(policy.delay_for(&excessive, 0), retry::max_delay());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter_ms: 250,
            ..RetryConfig::default()
        });
        for _ in 0..50 {
            let delay = policy.delay_for(&http(500), 0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1250));
        }
    }
}
