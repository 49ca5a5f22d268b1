//! Fetch request options.

use std::time::Duration;

use super::CacheKey;

/// A request for one cacheable unit, plus how to store and guard it.
///
/// ```rust
/// # use cloudfetch::{CacheKey, FetchRequest, Provider, ServiceType};
/// # use std::time::Duration;
/// let request = FetchRequest::new(CacheKey::new(Provider::Aws, ServiceType::Pricing, "us-east-1"))
///     .tag("api_call:42")
///     .ttl(Duration::from_secs(600));
/// assert_eq!(request.circuit_name(), "aws:pricing");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub key: CacheKey,
    /// Tags stored with the cached payload, for bulk invalidation.
    pub tags: Vec<String>,
    /// TTL for the payload. `None` uses the service type's TTL.
    pub ttl: Option<Duration>,
    /// Circuit to guard the call with. `None` uses `provider:service`.
    ///
    /// A circuit takes its thresholds from the first request that uses it.
    /// Later requests sharing the name reuse those settings, whatever their
    /// own provider and service resolve to.
    pub circuit: Option<String>,
}

impl FetchRequest {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            tags: Vec::new(),
            ttl: None,
            circuit: None,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Guard the call with the circuit `name`. See [`FetchRequest::circuit`]
    /// for how shared circuits are configured.
    pub fn circuit(mut self, name: impl Into<String>) -> Self {
        self.circuit = Some(name.into());
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The circuit this request is guarded by.
    pub fn circuit_name(&self) -> String {
        self.circuit
            .clone()
            .unwrap_or_else(|| self.key.circuit_name())
    }
}

impl From<CacheKey> for FetchRequest {
    fn from(key: CacheKey) -> Self {
        Self::new(key)
    }
}
