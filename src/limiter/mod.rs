//! Per `(provider, service)` admission control.
//!
//! [`RateLimiter::admit`] is a non-blocking check against a sliding window
//! (default 1 s) and a shorter burst sub-window (default 100 ms). It never
//! sleeps: callers decide whether to wait for `retry_after`, retry later or
//! fall back to cached data.
//!
//! Each pair owns a [`RateLimitWindow`] behind its own lock, so admissions
//! for one provider never contend with another's.

mod window;

pub use window::RateLimitWindow;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::policy::PolicyTable;
use crate::telemetry;
use crate::types::{Provider, ServiceType};
use crate::{FetchError, Result};

/// Limits for one `(provider, service)` pair.
///
/// ```rust
/// # use cloudfetch::RateLimitConfig;
/// let config = RateLimitConfig::new().calls_per_second(20).burst(5);
/// assert_eq!(config.calls_per_second, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Calls admitted per `window`. Default: 10.
    pub calls_per_second: u32,
    /// Calls admitted per `burst_window`. Default: 5.
    pub burst: u32,
    /// Length of the sliding window. Default: 1 s.
    pub window: Duration,
    /// Length of the burst sub-window. Default: 100 ms.
    pub burst_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_second: 10,
            burst: 5,
            window: Duration::from_secs(1),
            burst_window: Duration::from_millis(100),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls_per_second(mut self, n: u32) -> Self {
        self.calls_per_second = n;
        self
    }

    pub fn burst(mut self, n: u32) -> Self {
        self.burst = n;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn burst_window(mut self, window: Duration) -> Self {
        self.burst_window = window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.calls_per_second == 0 || self.burst == 0 {
            return Err(FetchError::Configuration(
                "calls_per_second and burst must be greater than zero".into(),
            ));
        }
        if self.window.is_zero() || self.burst_window.is_zero() {
            return Err(FetchError::Configuration(
                "rate limit windows must be greater than zero".into(),
            ));
        }
        if self.burst_window > self.window {
            return Err(FetchError::Configuration(
                "burst_window must not exceed window".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Over the limit. `retry_after` is always positive.
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

type WindowKey = (Provider, ServiceType);

/// Process-wide rate limiter.
pub struct RateLimiter {
    limits: PolicyTable<RateLimitConfig>,
    windows: Mutex<HashMap<WindowKey, Arc<Mutex<RateLimitWindow>>>>,
}

impl RateLimiter {
    /// A limiter applying `limits` (default plus overrides).
    pub fn new(limits: PolicyTable<RateLimitConfig>) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter applying one config to every pair.
    pub fn uniform(config: RateLimitConfig) -> Self {
        Self::new(PolicyTable::new(config))
    }

    pub fn limits(&self) -> &PolicyTable<RateLimitConfig> {
        &self.limits
    }

    pub fn config_for(&self, provider: Provider, service: ServiceType) -> &RateLimitConfig {
        self.limits.resolve(provider, service)
    }

    /// Admit or deny one call for `(provider, service)`.
    pub fn admit(&self, provider: Provider, service: ServiceType) -> Admission {
        let config = self.limits.resolve(provider, service);
        let window = self.window(provider, service);
        let admission = window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .admit_at(Instant::now(), config);

        if let Admission::Denied { retry_after } = admission {
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL,
                "provider" => provider.as_str(),
                "service" => service.as_str(),
            )
            .increment(1);
            debug!(
                %provider,
                %service,
                retry_after_ms = retry_after.as_millis() as u64,
                "admission denied"
            );
        }
        admission
    }

    /// Calls currently counted in the sliding window for `(provider, service)`.
    pub fn in_window(&self, provider: Provider, service: ServiceType) -> usize {
        let config = self.limits.resolve(provider, service);
        self.window(provider, service)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .count_at(Instant::now(), config.window)
    }

    /// Forget all recorded calls for `(provider, service)`.
    pub fn reset(&self, provider: Provider, service: ServiceType) {
        self.window(provider, service)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn window(&self, provider: Provider, service: ServiceType) -> Arc<Mutex<RateLimitWindow>> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(windows.entry((provider, service)).or_default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default", self.limits.default_value())
            .finish_non_exhaustive()
    }
}
