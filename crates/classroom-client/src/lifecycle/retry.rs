//! Credential retry policy.
//!
//! Retryability is decided from the typed error kind alone. Retry `n`
//! (0-indexed) waits `base_delay * 2^n`.

use crate::config::Config;
use crate::errors::CredentialError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry { delay: Duration },
    /// Give up; the session fails.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_MAX_CREDENTIAL_RETRIES,
            base_delay: Duration::from_millis(crate::config::DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_credential_retries,
            base_delay: config.retry_base_delay,
        }
    }

    /// Backoff before retry number `retry_count` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide what to do after a failed fetch, given the retries already used.
    #[must_use]
    pub fn decide(&self, retry_count: u32, error: &CredentialError) -> RetryDecision {
        if !error.is_retryable() || retry_count >= self.max_attempts {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry {
            delay: self.delay_for(retry_count),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(64) >= policy.delay_for(31));
    }

    #[test]
    fn test_transient_errors_retry_until_exhausted() {
        let policy = RetryPolicy::default();
        let err = CredentialError::Service { status: 503 };

        assert_eq!(
            policy.decide(0, &err),
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(2, &err),
            RetryDecision::Retry {
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(policy.decide(3, &err), RetryDecision::Fail);
    }

    #[test]
    fn test_unauthorized_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, &CredentialError::Unauthorized("expired".to_string())),
            RetryDecision::Fail
        );
        assert_eq!(
            policy.decide(0, &CredentialError::MissingSessionToken),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_zero_attempts_fails_immediately() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(10),
        };
        assert_eq!(
            policy.decide(0, &CredentialError::Network("down".to_string())),
            RetryDecision::Fail
        );
    }
}
