//! Public entry point: cache-or-fetch with single-flight.
//!
//! [`FetchCoordinator`] answers every request with a [`FetchEnvelope`]:
//!
//! - a fresh cache hit returns at once with `source = cache`;
//! - on a miss, concurrent requests for the same key share one fetch. The
//!   leader re-checks the cache, then hands the request to the
//!   [`ResilienceOrchestrator`]; followers receive the leader's result.
//!
//! Build one with [`CloudFetch::builder()`] and share it by cloning.

mod builder;
pub mod single_flight;

pub use builder::{CloudFetch, CloudFetchBuilder};
pub use single_flight::{Flight, SingleFlight};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::CacheStore;
use crate::limiter::RateLimiter;
use crate::resilience::{CircuitBreaker, ResilienceOrchestrator};
use crate::telemetry;
use crate::traits::Fetcher;
use crate::types::{CacheKey, FetchEnvelope, FetchRequest, Params, Provider, ServiceType};
use crate::Result;

/// Cheaply cloneable handle to the fetch orchestration core.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    orchestrator: ResilienceOrchestrator,
    flights: SingleFlight<CacheKey, Result<FetchEnvelope>>,
}

impl FetchCoordinator {
    pub fn new(orchestrator: ResilienceOrchestrator) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                flights: SingleFlight::new(),
            }),
        }
    }

    /// Return cached data for the key, or fetch it through `fetcher`.
    ///
    /// ```rust,no_run
    /// # use cloudfetch::{CloudFetch, Params, Provider, ServiceType, UpstreamError};
    /// # async fn run() -> cloudfetch::Result<()> {
    /// let coordinator = CloudFetch::builder().build()?;
    /// let envelope = coordinator
    ///     .get_or_fetch(
    ///         Provider::Aws,
    ///         ServiceType::Compute,
    ///         "us-east-1",
    ///         Params::new(),
    ///         &|| async { Ok::<_, UpstreamError>(serde_json::json!({"m5.large": 0.096})) },
    ///     )
    ///     .await?;
    /// println!("{}", envelope.source);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_or_fetch<F>(
        &self,
        provider: Provider,
        service: ServiceType,
        region: impl Into<String>,
        params: Params,
        fetcher: &F,
    ) -> Result<FetchEnvelope>
    where
        F: Fetcher + ?Sized,
    {
        let key = CacheKey::with_params(provider, service, region, params);
        self.fetch(FetchRequest::new(key), fetcher).await
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), with tags, TTL and
    /// circuit overrides.
    pub async fn fetch<F>(&self, request: FetchRequest, fetcher: &F) -> Result<FetchEnvelope>
    where
        F: Fetcher + ?Sized,
    {
        if let Some(envelope) = self.cached(&request.key) {
            debug!(key = %request.key, "cache hit");
            return Ok(envelope);
        }
        self.coalesced(request, fetcher, true).await
    }

    /// Fetch even if a fresh entry is cached. Concurrent callers for the same
    /// key still share one fetch, and failures fall back to the cached entry.
    pub async fn refresh<F>(&self, request: FetchRequest, fetcher: &F) -> Result<FetchEnvelope>
    where
        F: Fetcher + ?Sized,
    {
        self.coalesced(request, fetcher, false).await
    }

    async fn coalesced<F>(
        &self,
        request: FetchRequest,
        fetcher: &F,
        recheck_cache: bool,
    ) -> Result<FetchEnvelope>
    where
        F: Fetcher + ?Sized,
    {
        let key = request.key.clone();
        let request = &request;
        let flight = self
            .inner
            .flights
            .run(&key, move || async move {
                if recheck_cache && let Some(envelope) = self.cached_quietly(&request.key) {
                    return Ok(envelope);
                }
                self.inner.orchestrator.execute(request, fetcher).await
            })
            .await;

        if flight.is_joined() {
            metrics::counter!(telemetry::COALESCED_TOTAL,
                "provider" => key.provider().as_str(),
                "service" => key.service().as_str(),
            )
            .increment(1);
            debug!(key = %key, "joined in-flight fetch");
        }
        flight.into_inner()
    }

    fn cached(&self, key: &CacheKey) -> Option<FetchEnvelope> {
        self.cache()
            .get(key, false)
            .map(|hit| FetchEnvelope::cached(key.to_string(), hit.payload, hit.age))
    }

    /// Leader re-check after [`cached`](Self::cached) already recorded the
    /// miss.
    fn cached_quietly(&self, key: &CacheKey) -> Option<FetchEnvelope> {
        self.cache()
            .peek(key)
            .map(|hit| FetchEnvelope::cached(key.to_string(), hit.payload, hit.age))
    }

    /// Remove one cached entry. Returns whether it was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.cache().invalidate(key)
    }

    /// Remove every cached entry carrying `tag`.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.cache().invalidate_tag(tag)
    }

    /// Remove every cached entry for `provider`.
    pub fn invalidate_provider(&self, provider: Provider) -> usize {
        self.cache().invalidate_provider(provider)
    }

    /// Run [`CacheStore::evict`] every `interval` until the returned handle
    /// is aborted or the coordinator is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let removed = inner.orchestrator.cache().evict();
                if removed > 0 {
                    debug!(removed, "cache sweep");
                }
            }
        })
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.inner.orchestrator.cache()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.inner.orchestrator.limiter()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.inner.orchestrator.breaker()
    }

    pub fn orchestrator(&self) -> &ResilienceOrchestrator {
        &self.inner.orchestrator
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("orchestrator", &self.inner.orchestrator)
            .field("in_flight", &self.inner.flights.in_flight())
            .finish()
    }
}
