//! Composite cache key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Provider, ServiceType};

/// Request parameters. Sorted by key so equal maps hash identically no matter
/// the order they were built in.
pub type Params = BTreeMap<String, String>;

/// Identity of one cacheable unit: `(provider, service, region, params)`.
///
/// Fields are private; a key cannot change once built.
///
/// ```rust
/// # use cloudfetch::{CacheKey, Provider, ServiceType};
/// let key = CacheKey::new(Provider::Aws, ServiceType::Pricing, "us-east-1")
///     .param("service_id", "AmazonEC2");
/// assert_eq!(key.to_string(), "aws:pricing:us-east-1:service_id=AmazonEC2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    provider: Provider,
    service: ServiceType,
    region: String,
    params: Params,
}

impl CacheKey {
    pub fn new(provider: Provider, service: ServiceType, region: impl Into<String>) -> Self {
        Self {
            provider,
            service,
            region: region.into(),
            params: Params::new(),
        }
    }

    /// Build a key with a complete parameter map.
    pub fn with_params(
        provider: Provider,
        service: ServiceType,
        region: impl Into<String>,
        params: Params,
    ) -> Self {
        Self {
            provider,
            service,
            region: region.into(),
            params,
        }
    }

    /// Add one parameter. Later values for the same name replace earlier ones.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Default circuit-breaker name for this key: `provider:service`.
    pub fn circuit_name(&self) -> String {
        format!("{}:{}", self.provider, self.service)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.service, self.region)?;
        let mut sep = ':';
        for (k, v) in &self.params {
            write!(f, "{sep}{k}={v}")?;
            sep = ',';
        }
        Ok(())
    }
}
