//! cloudfetch - resilient multi-cloud pricing fetch core
//!
//! This crate sits between an API layer and the pricing/catalog endpoints of
//! AWS, Azure, GCP, IBM and Alibaba. Every read goes through a
//! [`FetchCoordinator`], which serves fresh cached data when it has it and
//! otherwise fetches through a fixed pipeline:
//!
//! ```text
//! cache (fresh) → single-flight → rate limiter → circuit breaker → fetch
//!                                   ↓ retry with backoff on failure
//!                                   ↓ stale cache fallback when exhausted
//! ```
//!
//! Every successful read returns a [`FetchEnvelope`] saying where the data
//! came from (`cache`, `fresh` or `stale_fallback`) and whether it is
//! degraded.
//!
//! # Example
//!
//! ```rust,no_run
//! use cloudfetch::providers::HttpFetcher;
//! use cloudfetch::{CloudFetch, Params, Provider, ServiceType};
//!
//! #[tokio::main]
//! async fn main() -> cloudfetch::Result<()> {
//!     let coordinator = CloudFetch::builder().build()?;
//!
//!     let fetcher = HttpFetcher::new("https://prices.azure.com/api/retail/prices")
//!         .query("$filter", "armRegionName eq 'eastus'");
//!
//!     let envelope = coordinator
//!         .get_or_fetch(Provider::Azure, ServiceType::Pricing, "eastus", Params::new(), &fetcher)
//!         .await?;
//!
//!     if envelope.degraded {
//!         eprintln!("warning: {}", envelope.warnings.join("; "));
//!     }
//!     println!("{}", envelope.data);
//!     Ok(())
//! }
//! ```
//!
//! # Closures as fetchers
//!
//! Provider-specific SDK calls plug in as closures:
//!
//! ```rust,no_run
//! # use cloudfetch::{CloudFetch, Params, Provider, ServiceType, UpstreamError};
//! # async fn run() -> cloudfetch::Result<()> {
//! let coordinator = CloudFetch::builder().build()?;
//! let envelope = coordinator
//!     .get_or_fetch(
//!         Provider::Ibm,
//!         ServiceType::Compute,
//!         "us-south",
//!         Params::new(),
//!         &|| async {
//!             // call the provider SDK here
//!             Err::<serde_json::Value, _>(UpstreamError::classify("Service Unavailable"))
//!         },
//!     )
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod limiter;
pub mod policy;
pub mod providers;
pub mod resilience;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheEntry, CacheHit, CacheStats, CacheStore, DEFAULT_TTL, TtlPolicy};
pub use config::Config;
pub use coordinator::{CloudFetch, CloudFetchBuilder, FetchCoordinator};
pub use error::{FetchError, Result, UpstreamError, UpstreamKind};
pub use limiter::{Admission, RateLimitConfig, RateLimiter};
pub use policy::PolicyTable;
pub use resilience::{
    CallPermit, CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState, ResilienceConfig,
    ResilienceOrchestrator, RetryConfig,
};
pub use traits::Fetcher;
pub use types::{
    CacheKey, DegradeCause, FetchEnvelope, FetchRequest, Params, Payload, Provider, ServiceType,
    Source,
};
