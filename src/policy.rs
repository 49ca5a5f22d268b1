//! Per-provider / per-service configuration lookup.

use std::collections::HashMap;

use crate::types::{Provider, ServiceType};
use crate::Result;

/// A default value plus overrides keyed by `provider` or `provider.service`.
///
/// Resolution order for `(provider, service)`:
/// 1. exact `provider.service` override
/// 2. `provider` override
/// 3. default
///
/// ```rust
/// # use cloudfetch::{PolicyTable, Provider, ServiceType};
/// let table = PolicyTable::new(10u32)
///     .for_provider(Provider::Aws, 5)
///     .for_service(Provider::Aws, ServiceType::Pricing, 2);
/// assert_eq!(*table.resolve(Provider::Aws, ServiceType::Pricing), 2);
/// assert_eq!(*table.resolve(Provider::Aws, ServiceType::Compute), 5);
/// assert_eq!(*table.resolve(Provider::Gcp, ServiceType::Pricing), 10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyTable<T> {
    default: T,
    overrides: HashMap<String, T>,
}

impl<T> PolicyTable<T> {
    pub fn new(default: T) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Override the value for every service of `provider`.
    pub fn for_provider(mut self, provider: Provider, value: T) -> Self {
        self.overrides.insert(provider.as_str().to_owned(), value);
        self
    }

    /// Override the value for one `(provider, service)` pair.
    pub fn for_service(mut self, provider: Provider, service: ServiceType, value: T) -> Self {
        self.overrides.insert(override_key(provider, service), value);
        self
    }

    /// Replace the default, keeping every override.
    pub fn set_default(&mut self, value: T) {
        self.default = value;
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    pub fn resolve(&self, provider: Provider, service: ServiceType) -> &T {
        self.overrides
            .get(&override_key(provider, service))
            .or_else(|| self.overrides.get(provider.as_str()))
            .unwrap_or(&self.default)
    }

    /// Run `check` against the default and every override.
    pub fn validate_with(&self, check: impl Fn(&str, &T) -> Result<()>) -> Result<()> {
        check("default", &self.default)?;
        for (name, value) in &self.overrides {
            check(name, value)?;
        }
        Ok(())
    }
}

fn override_key(provider: Provider, service: ServiceType) -> String {
    format!("{}.{}", provider.as_str(), service.as_str())
}
