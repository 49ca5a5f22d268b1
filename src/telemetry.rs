//! Telemetry metric name constants.
//!
//! Centralised metric names for cloudfetch operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `cloudfetch_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider name (e.g. "aws", "gcp")
//! - `service`: service type (e.g. "pricing", "compute")
//! - `status`: "ok" or the upstream failure kind
//! - `circuit`: circuit-breaker name (e.g. "aws:pricing")

/// Fresh cache hits.
///
/// Labels: `provider`, `service`.
pub const CACHE_HITS_TOTAL: &str = "cloudfetch_cache_hits_total";

/// Cache misses on the fresh-read path.
///
/// Labels: `provider`, `service`.
pub const CACHE_MISSES_TOTAL: &str = "cloudfetch_cache_misses_total";

/// Stale entries served as fallback.
///
/// Labels: `provider`, `service`, `cause`.
pub const STALE_SERVED_TOTAL: &str = "cloudfetch_stale_served_total";

/// Entries removed by size-limit eviction or grace-window sweep.
///
/// Labels: `reason` ("capacity" | "expired").
pub const CACHE_EVICTIONS_TOTAL: &str = "cloudfetch_cache_evictions_total";

/// Upstream fetch attempts.
///
/// Labels: `provider`, `service`, `status`.
pub const UPSTREAM_REQUESTS_TOTAL: &str = "cloudfetch_upstream_requests_total";

/// Upstream fetch attempt duration in seconds.
///
/// Labels: `provider`, `service`.
pub const UPSTREAM_DURATION_SECONDS: &str = "cloudfetch_upstream_duration_seconds";

/// Retry attempts (not counting the initial attempt).
///
/// Labels: `provider`, `service`.
pub const RETRIES_TOTAL: &str = "cloudfetch_retries_total";

/// Admissions denied by the rate limiter.
///
/// Labels: `provider`, `service`.
pub const RATE_LIMITED_TOTAL: &str = "cloudfetch_rate_limited_total";

/// Circuit-breaker state transitions.
///
/// Labels: `circuit`, `to` ("open" | "half_open" | "closed").
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "cloudfetch_circuit_transitions_total";

/// Requests that joined an in-flight fetch instead of issuing their own.
///
/// Labels: `provider`, `service`.
pub const COALESCED_TOTAL: &str = "cloudfetch_coalesced_requests_total";
