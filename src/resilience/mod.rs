//! Resilience layer: retry, circuit breaking and stale fallback.
//!
//! - [`CircuitBreaker`]: per-service CLOSED/OPEN/HALF_OPEN state machine.
//! - [`RetryConfig`]: attempt budget and per-failure-class backoff.
//! - [`ResilienceOrchestrator`]: composes rate limiting, circuit breaking,
//!   retry and stale fallback around one fetch operation.

pub mod circuit;
pub mod orchestrator;
pub mod retry;

pub use circuit::{CallPermit, CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState};
pub use orchestrator::ResilienceOrchestrator;
pub use retry::RetryConfig;

use std::time::Duration;

use crate::{FetchError, Result};

/// Breaker, retry and timeout settings for one provider or service.
///
/// ```rust
/// # use cloudfetch::{CircuitConfig, ResilienceConfig, RetryConfig};
/// # use std::time::Duration;
/// let config = ResilienceConfig::new()
///     .circuit(CircuitConfig::new().failure_threshold(3))
///     .retry(RetryConfig::new().max_attempts(2))
///     .call_timeout(Duration::from_secs(5));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceConfig {
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    /// Upper bound on a single fetch attempt. Default: 10s.
    pub call_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl ResilienceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.circuit.validate()?;
        self.retry.validate()?;
        if self.call_timeout.is_zero() {
            return Err(FetchError::Configuration(
                "call_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.circuit.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_reaches_nested_configs() {
        assert!(
            ResilienceConfig::new()
                .circuit(CircuitConfig::new().failure_threshold(0))
                .validate()
                .is_err()
        );
        assert!(
            ResilienceConfig::new()
                .call_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
