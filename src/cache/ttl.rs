//! Per-service-type TTL policy.

use std::collections::HashMap;
use std::time::Duration;

use crate::types::ServiceType;
use crate::{FetchError, Result};

/// Maps a [`ServiceType`] to how long its data stays fresh.
///
/// Catalog and pricing data changes rarely and gets long TTLs; cost and
/// budget figures go out of date quickly and get short ones.
///
/// ```rust
/// # use cloudfetch::{ServiceType, TtlPolicy};
/// # use std::time::Duration;
/// let policy = TtlPolicy::default().ttl(ServiceType::Storage, Duration::from_secs(7200));
/// assert_eq!(policy.ttl_for(ServiceType::Storage), Duration::from_secs(7200));
/// assert_eq!(policy.ttl_for(ServiceType::CostEstimation), Duration::from_secs(1800));
/// ```
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default: Duration,
    overrides: HashMap<ServiceType, Duration>,
}

/// TTL for service types without an explicit entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

impl Default for TtlPolicy {
    fn default() -> Self {
        let overrides = HashMap::from([
            (ServiceType::Pricing, Duration::from_secs(3600)),
            (ServiceType::Compute, Duration::from_secs(3600)),
            (ServiceType::CostEstimation, Duration::from_secs(1800)),
            (ServiceType::Budget, Duration::from_secs(300)),
        ]);
        Self {
            default: DEFAULT_TTL,
            overrides,
        }
    }
}

impl TtlPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that applies `ttl` to every service type.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            default: ttl,
            overrides: HashMap::new(),
        }
    }

    /// Set the TTL for one service type.
    pub fn ttl(mut self, service: ServiceType, ttl: Duration) -> Self {
        self.overrides.insert(service, ttl);
        self
    }

    /// Set the TTL for service types without an explicit entry.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default = ttl;
        self
    }

    pub fn ttl_for(&self, service: ServiceType) -> Duration {
        self.overrides.get(&service).copied().unwrap_or(self.default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default.is_zero() {
            return Err(FetchError::Configuration(
                "default TTL must be greater than zero".into(),
            ));
        }
        if let Some((service, _)) = self.overrides.iter().find(|(_, ttl)| ttl.is_zero()) {
            return Err(FetchError::Configuration(format!(
                "TTL for {service} must be greater than zero"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_data_volatility() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for(ServiceType::Pricing), Duration::from_secs(3600));
        assert_eq!(
            policy.ttl_for(ServiceType::CostEstimation),
            Duration::from_secs(1800)
        );
        assert_eq!(policy.ttl_for(ServiceType::Budget), Duration::from_secs(300));
        assert_eq!(policy.ttl_for(ServiceType::Networking), DEFAULT_TTL);
    }

    #[test]
    fn uniform_ignores_defaults() {
        let policy = TtlPolicy::uniform(Duration::from_millis(50));
        assert_eq!(policy.ttl_for(ServiceType::Budget), Duration::from_millis(50));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(TtlPolicy::default().validate().is_ok());
        assert!(TtlPolicy::uniform(Duration::ZERO).validate().is_err());
        let policy = TtlPolicy::default().ttl(ServiceType::Compute, Duration::ZERO);
        assert!(policy.validate().is_err());
    }
}
