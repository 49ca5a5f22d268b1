//! Builder for configuring coordinator instances

use std::sync::Arc;

use super::FetchCoordinator;
use crate::cache::{CacheConfig, CacheStore, TtlPolicy};
use crate::config::Config;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::policy::PolicyTable;
use crate::resilience::{CircuitBreaker, ResilienceConfig, ResilienceOrchestrator};
use crate::types::{Provider, ServiceType};
use crate::{FetchError, Result};

/// Main entry point for creating coordinator instances.
pub struct CloudFetch;

impl CloudFetch {
    /// Create a new builder for configuring the coordinator.
    pub fn builder() -> CloudFetchBuilder {
        CloudFetchBuilder::new()
    }
}

/// Builder for configuring coordinator instances.
///
/// ```rust
/// # use cloudfetch::{CloudFetch, CacheConfig, RateLimitConfig, Provider, ServiceType};
/// let coordinator = CloudFetch::builder()
///     .cache(CacheConfig::new().max_entries(200))
///     .rate_limit_for_service(
///         Provider::Aws,
///         ServiceType::Pricing,
///         RateLimitConfig::new().calls_per_second(5).burst(2),
///     )
///     .build()
///     .unwrap();
/// assert_eq!(coordinator.cache().config().max_entries, 200);
/// ```
#[derive(Debug, Clone)]
pub struct CloudFetchBuilder {
    cache: CacheConfig,
    ttl: TtlPolicy,
    rate_limits: PolicyTable<RateLimitConfig>,
    resilience: PolicyTable<ResilienceConfig>,
}

impl CloudFetchBuilder {
    pub fn new() -> Self {
        Self {
            cache: CacheConfig::default(),
            ttl: TtlPolicy::default(),
            rate_limits: PolicyTable::default(),
            resilience: PolicyTable::default(),
        }
    }

    /// Start from a loaded configuration file.
    pub fn from_config(config: Config) -> Self {
        let (cache, ttl, rate_limits, resilience) = config.into_parts();
        Self {
            cache,
            ttl,
            rate_limits,
            resilience,
        }
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    pub fn ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl = policy;
        self
    }

    /// Replace the whole rate-limit table.
    pub fn rate_limits(mut self, table: PolicyTable<RateLimitConfig>) -> Self {
        self.rate_limits = table;
        self
    }

    /// Limits for every `(provider, service)` pair without an override.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limits.set_default(config);
        self
    }

    pub fn rate_limit_for(mut self, provider: Provider, config: RateLimitConfig) -> Self {
        self.rate_limits = self.rate_limits.for_provider(provider, config);
        self
    }

    pub fn rate_limit_for_service(
        mut self,
        provider: Provider,
        service: ServiceType,
        config: RateLimitConfig,
    ) -> Self {
        self.rate_limits = self.rate_limits.for_service(provider, service, config);
        self
    }

    /// Replace the whole resilience table.
    pub fn resilience_table(mut self, table: PolicyTable<ResilienceConfig>) -> Self {
        self.resilience = table;
        self
    }

    /// Breaker, retry and timeout settings for every provider without an
    /// override.
    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.resilience.set_default(config);
        self
    }

    pub fn resilience_for(mut self, provider: Provider, config: ResilienceConfig) -> Self {
        self.resilience = self.resilience.for_provider(provider, config);
        self
    }

    pub fn resilience_for_service(
        mut self,
        provider: Provider,
        service: ServiceType,
        config: ResilienceConfig,
    ) -> Self {
        self.resilience = self.resilience.for_service(provider, service, config);
        self
    }

    /// Validate every setting and build the coordinator.
    pub fn build(self) -> Result<FetchCoordinator> {
        self.cache.validate()?;
        self.ttl.validate()?;
        self.rate_limits
            .validate_with(|name, config| config.validate().map_err(|e| scoped(name, e)))?;
        self.resilience
            .validate_with(|name, config| config.validate().map_err(|e| scoped(name, e)))?;

        let cache = Arc::new(CacheStore::new(self.cache));
        let limiter = Arc::new(RateLimiter::new(self.rate_limits));
        let breaker = Arc::new(CircuitBreaker::new(
            self.resilience.default_value().circuit.clone(),
        ));
        let orchestrator =
            ResilienceOrchestrator::new(cache, limiter, breaker, self.ttl, self.resilience);
        Ok(FetchCoordinator::new(orchestrator))
    }
}

impl Default for CloudFetchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix a configuration error with the policy entry it came from.
fn scoped(name: &str, err: FetchError) -> FetchError {
    match err {
        FetchError::Configuration(msg) => FetchError::Configuration(format!("{name}: {msg}")),
        other => other,
    }
}
