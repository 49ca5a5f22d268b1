//! Configuration file loading.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. an explicit path (`--config <path>`)
//! 2. `~/.cloudfetch/config.toml` (user)
//! 3. `/etc/cloudfetch/config.toml` (system)
//! 4. built-in defaults
//!
//! ```toml
//! [cache]
//! max_entries = 200
//! grace_multiplier = 4
//!
//! [cache.ttl]
//! default_secs = 3600
//! budget = 300
//! cost_estimation = 1800
//!
//! [rate_limits.default]
//! calls_per_second = 10
//! burst = 5
//!
//! [rate_limits."aws.pricing"]
//! calls_per_second = 5
//!
//! [resilience.default]
//! failure_threshold = 5
//! recovery_timeout_secs = 60
//! max_retries = 3
//! base_delay_ms = 500
//! max_delay_ms = 30000
//! call_timeout_ms = 10000
//! ```
//!
//! Overrides under `rate_limits` and `resilience` are keyed `provider` or
//! `provider.service` and inherit unset fields from the `default` section.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheConfig, TtlPolicy};
use crate::limiter::RateLimitConfig;
use crate::policy::PolicyTable;
use crate::resilience::{CircuitConfig, ResilienceConfig, RetryConfig};
use crate::types::{Provider, ServiceType};
use crate::{FetchError, Result};

/// Name of the fallback section in `rate_limits` and `resilience`.
const DEFAULT_SECTION: &str = "default";

/// Parsed configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitSection>,
    #[serde(default)]
    pub resilience: BTreeMap<String, ResilienceSection>,
}

/// `[cache]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    pub max_entries: Option<u64>,
    pub grace_multiplier: Option<u32>,
    #[serde(default)]
    pub ttl: TtlSection,
}

/// `[cache.ttl]`: `default_secs` plus one `service_type = secs` entry per
/// overridden service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TtlSection {
    pub default_secs: Option<u64>,
    #[serde(flatten)]
    pub services: HashMap<ServiceType, u64>,
}

/// `[rate_limits.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    pub calls_per_second: Option<u32>,
    pub burst: Option<u32>,
    pub window_ms: Option<u64>,
    pub burst_window_ms: Option<u64>,
}

/// `[resilience.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceSection {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    pub call_timeout_ms: Option<u64>,
}

impl RateLimitSection {
    /// Apply the fields set in this section on top of `base`.
    fn apply(&self, base: RateLimitConfig) -> RateLimitConfig {
        RateLimitConfig {
            calls_per_second: self.calls_per_second.unwrap_or(base.calls_per_second),
            burst: self.burst.unwrap_or(base.burst),
            window: self.window_ms.map(Duration::from_millis).unwrap_or(base.window),
            burst_window: self
                .burst_window_ms
                .map(Duration::from_millis)
                .unwrap_or(base.burst_window),
        }
    }
}

impl From<&RateLimitSection> for RateLimitConfig {
    fn from(section: &RateLimitSection) -> Self {
        section.apply(RateLimitConfig::default())
    }
}

impl ResilienceSection {
    /// Apply the fields set in this section on top of `base`.
    fn apply(&self, base: ResilienceConfig) -> ResilienceConfig {
        let ms = |v: Option<u64>, fallback: Duration| v.map(Duration::from_millis).unwrap_or(fallback);
        ResilienceConfig {
            circuit: CircuitConfig {
                failure_threshold: self
                    .failure_threshold
                    .unwrap_or(base.circuit.failure_threshold),
                recovery_timeout: self
                    .recovery_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(base.circuit.recovery_timeout),
            },
            retry: RetryConfig {
                max_attempts: self.max_retries.unwrap_or(base.retry.max_attempts),
                base_delay: ms(self.base_delay_ms, base.retry.base_delay),
                max_delay: ms(self.max_delay_ms, base.retry.max_delay),
                jitter: self.jitter.unwrap_or(base.retry.jitter),
            },
            call_timeout: ms(self.call_timeout_ms, base.call_timeout),
        }
    }
}

impl From<&ResilienceSection> for ResilienceConfig {
    fn from(section: &ResilienceSection) -> Self {
        section.apply(ResilienceConfig::default())
    }
}

impl From<&CacheSection> for CacheConfig {
    fn from(section: &CacheSection) -> Self {
        let base = CacheConfig::default();
        CacheConfig {
            max_entries: section.max_entries.unwrap_or(base.max_entries),
            grace_multiplier: section.grace_multiplier.unwrap_or(base.grace_multiplier),
        }
    }
}

impl From<&TtlSection> for TtlPolicy {
    fn from(section: &TtlSection) -> Self {
        let mut policy = match section.default_secs {
            Some(secs) => TtlPolicy::default().default_ttl(Duration::from_secs(secs)),
            None => TtlPolicy::default(),
        };
        for (service, secs) in &section.services {
            policy = policy.ttl(*service, Duration::from_secs(*secs));
        }
        policy
    }
}

impl Config {
    /// Load configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            FetchError::Configuration(format!("failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            FetchError::Configuration(msg) => {
                FetchError::Configuration(format!("{path:?}: {msg}"))
            }
            other => other,
        })
    }

    /// Load from the explicit path if given, else the first standard
    /// location that exists, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit)? {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and check a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)
            .map_err(|e| FetchError::Configuration(format!("failed to parse config: {e}")))?;
        config.check_section_names()?;
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(FetchError::Configuration(format!(
                "config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cloudfetch").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/cloudfetch/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    fn check_section_names(&self) -> Result<()> {
        let names = self.rate_limits.keys().chain(self.resilience.keys());
        for name in names.filter(|n| *n != DEFAULT_SECTION) {
            parse_section_name(name)?;
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::from(&self.cache.ttl)
    }

    /// Rate limits as a policy table. Overrides inherit from `default`.
    pub fn rate_limit_table(&self) -> PolicyTable<RateLimitConfig> {
        let default = self
            .rate_limits
            .get(DEFAULT_SECTION)
            .map(RateLimitConfig::from)
            .unwrap_or_default();
        let mut table = PolicyTable::new(default.clone());
        for (name, section) in overrides(&self.rate_limits) {
            table = insert(table, name, section.apply(default.clone()));
        }
        table
    }

    /// Resilience settings as a policy table. Overrides inherit from
    /// `default`.
    pub fn resilience_table(&self) -> PolicyTable<ResilienceConfig> {
        let default = self
            .resilience
            .get(DEFAULT_SECTION)
            .map(ResilienceConfig::from)
            .unwrap_or_default();
        let mut table = PolicyTable::new(default.clone());
        for (name, section) in overrides(&self.resilience) {
            table = insert(table, name, section.apply(default.clone()));
        }
        table
    }

    /// Runtime configuration: cache, TTL policy, rate limits, resilience.
    pub fn into_parts(
        self,
    ) -> (
        CacheConfig,
        TtlPolicy,
        PolicyTable<RateLimitConfig>,
        PolicyTable<ResilienceConfig>,
    ) {
        (
            self.cache_config(),
            self.ttl_policy(),
            self.rate_limit_table(),
            self.resilience_table(),
        )
    }
}

/// Non-default sections with parseable names.
fn overrides<S>(
    sections: &BTreeMap<String, S>,
) -> impl Iterator<Item = ((Provider, Option<ServiceType>), &S)> {
    sections
        .iter()
        .filter(|(name, _)| *name != DEFAULT_SECTION)
        .filter_map(|(name, section)| parse_section_name(name).ok().map(|n| (n, section)))
}

fn insert<T>(
    table: PolicyTable<T>,
    (provider, service): (Provider, Option<ServiceType>),
    value: T,
) -> PolicyTable<T> {
    match service {
        Some(service) => table.for_service(provider, service, value),
        None => table.for_provider(provider, value),
    }
}

/// Parse `provider` or `provider.service`.
fn parse_section_name(name: &str) -> Result<(Provider, Option<ServiceType>)> {
    match name.split_once('.') {
        Some((provider, service)) => Ok((provider.parse()?, Some(service.parse()?))),
        None => Ok((name.parse()?, None)),
    }
}
