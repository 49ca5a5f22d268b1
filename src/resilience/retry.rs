//! Retry configuration and backoff calculation.
//!
//! [`RetryConfig`] controls how many attempts the orchestrator makes and how
//! long it waits between them. The wait depends on why the attempt failed:
//!
//! | failure        | delay before next attempt                          |
//! |----------------|----------------------------------------------------|
//! | throttling     | provider `retry_after`, else `base × 2^attempt`    |
//! | transient      | `base / 2 × 2^attempt`                             |
//! | unknown        | `base × 2^attempt`                                 |
//! | auth/validation| not retried                                        |
//!
//! Jitter of up to 10% is added on top when enabled, and every delay is
//! capped at `max_delay`.

use std::time::Duration;

use crate::{FetchError, Result, UpstreamKind};

/// Configuration for retry behaviour on retryable upstream errors.
///
/// ```rust
/// # use cloudfetch::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 500ms.
    pub base_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Also the
    /// longest rate-limit wait the orchestrator will sit out. Default: 30s.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays. Default: true.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FetchError::Configuration(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(FetchError::Configuration(
                "base_delay must not exceed max_delay".into(),
            ));
        }
        Ok(())
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.
    /// Does NOT include jitter; see [`backoff()`](Self::backoff) for the full
    /// calculation.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Delay before retrying after attempt `attempt` failed with `kind`.
    ///
    /// A provider `retry_after` hint on a throttling error takes precedence
    /// over the calculated backoff (still capped at `max_delay`).
    pub fn backoff(
        &self,
        kind: UpstreamKind,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Duration {
        let delay = match kind {
            UpstreamKind::Throttling => match retry_after {
                Some(hint) => return hint.min(self.max_delay),
                None => self.delay_for_attempt(attempt),
            },
            UpstreamKind::Transient => self.delay_for_attempt(attempt) / 2,
            _ => self.delay_for_attempt(attempt),
        };
        self.with_jitter(delay).min(self.max_delay)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let range = delay.as_millis() as u64 / 10;
        if range == 0 {
            return delay;
        }
        delay + Duration::from_millis(fastrand::u64(0..range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig::new()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(2))
            .jitter(false)
    }

    #[test]
    fn defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn exponential_growth_is_capped() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(2));
    }

    #[test]
    fn transient_backs_off_half_as_long() {
        let config = no_jitter();
        assert_eq!(
            config.backoff(UpstreamKind::Transient, 1, None),
            Duration::from_millis(100)
        );
        assert_eq!(
            config.backoff(UpstreamKind::Unknown, 1, None),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn throttling_hint_takes_precedence() {
        let config = no_jitter();
        assert_eq!(
            config.backoff(UpstreamKind::Throttling, 0, Some(Duration::from_millis(750))),
            Duration::from_millis(750)
        );
        assert_eq!(
            config.backoff(UpstreamKind::Throttling, 0, Some(Duration::from_secs(60))),
            Duration::from_secs(2)
        );
        assert_eq!(
            config.backoff(UpstreamKind::Throttling, 2, None),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let config = no_jitter().jitter(true);
        for _ in 0..100 {
            let d = config.backoff(UpstreamKind::Unknown, 2, None);
            assert!(d >= Duration::from_millis(400));
            assert!(d < Duration::from_millis(440));
        }
    }

    #[test]
    fn validation() {
        assert!(RetryConfig::new().max_attempts(0).validate().is_err());
        assert!(
            RetryConfig::new()
                .base_delay(Duration::from_secs(60))
                .validate()
                .is_err()
        );
        assert!(RetryConfig::disabled().validate().is_ok());
    }
}
