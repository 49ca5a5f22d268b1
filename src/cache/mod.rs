//! Caching subsystem.
//!
//! - [`CacheStore`]: moka-backed payload store keyed on [`CacheKey`](crate::CacheKey).
//!   Serves fresh reads on the hot path and stale reads on the fallback
//!   path, bounded by a grace window and a maximum entry count.
//!
//! - [`TtlPolicy`]: how long each [`ServiceType`](crate::ServiceType)'s data
//!   stays fresh.

pub mod store;
pub mod ttl;

pub use store::{CacheConfig, CacheEntry, CacheHit, CacheStats, CacheStore};
pub use ttl::{DEFAULT_TTL, TtlPolicy};
