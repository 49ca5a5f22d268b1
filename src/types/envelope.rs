//! Uniform result envelope returned to callers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fetched data. Shared between the cache and every caller that receives it.
pub type Payload = Arc<serde_json::Value>;

/// Where the data in an envelope came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Fresh cache hit; no upstream call was made.
    Cache,
    /// Fetched from the provider for this request (or the request it joined).
    Fresh,
    /// Expired cache entry served because a fresh fetch could not complete.
    StaleFallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Cache => "cache",
            Source::Fresh => "fresh",
            Source::StaleFallback => "stale_fallback",
        })
    }
}

/// Why a request fell back to stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeCause {
    RateLimited,
    CircuitOpen,
    FetchError,
}

impl DegradeCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradeCause::RateLimited => "rate_limited",
            DegradeCause::CircuitOpen => "circuit_open",
            DegradeCause::FetchError => "fetch_error",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            DegradeCause::RateLimited => "provider rate limit reached",
            DegradeCause::CircuitOpen => "provider circuit is open",
            DegradeCause::FetchError => "provider fetch failed",
        }
    }
}

/// Result envelope: `{data, source, degraded, warnings, error?}` plus the key
/// fingerprint and payload age.
///
/// `degraded` is true exactly when `source` is [`Source::StaleFallback`].
#[derive(Debug, Clone, Serialize)]
pub struct FetchEnvelope {
    pub data: Payload,
    pub source: Source,
    pub degraded: bool,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rendered [`CacheKey`](crate::CacheKey).
    pub key: String,
    /// Age of `data` when it was served, in milliseconds.
    pub age_ms: u64,
}

impl FetchEnvelope {
    pub(crate) fn cached(key: String, data: Payload, age: Duration) -> Self {
        Self {
            data,
            source: Source::Cache,
            degraded: false,
            warnings: Vec::new(),
            error: None,
            key,
            age_ms: age.as_millis() as u64,
        }
    }

    pub(crate) fn fresh(key: String, data: Payload) -> Self {
        Self {
            data,
            source: Source::Fresh,
            degraded: false,
            warnings: Vec::new(),
            error: None,
            key,
            age_ms: 0,
        }
    }

    pub(crate) fn stale(
        key: String,
        data: Payload,
        age: Duration,
        cause: DegradeCause,
        error: String,
    ) -> Self {
        let warning = format!(
            "{}; serving cached data from {}s ago",
            cause.describe(),
            age.as_secs()
        );
        Self {
            data,
            source: Source::StaleFallback,
            degraded: true,
            warnings: vec![warning],
            error: Some(error),
            key,
            age_ms: age.as_millis() as u64,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.source == Source::Fresh
    }

    pub fn is_cache_hit(&self) -> bool {
        self.source == Source::Cache
    }

    pub fn is_stale(&self) -> bool {
        self.source == Source::StaleFallback
    }
}
