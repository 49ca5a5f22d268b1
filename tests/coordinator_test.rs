//! Tests for [`FetchCoordinator`]: cache-or-fetch, single-flight and
//! invalidation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;

use cloudfetch::{
    CacheKey, CloudFetch, FetchError, FetchRequest, Fetcher, Params, Provider, RateLimitConfig,
    ResilienceConfig, RetryConfig, ServiceType, Source, UpstreamError,
};

// ============================================================================
// Mock fetchers
// ============================================================================

/// Sleeps, then returns a fixed payload.
struct SlowFetcher {
    delay: Duration,
    calls: AtomicU32,
}

impl SlowFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self) -> Result<serde_json::Value, UpstreamError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({ "call": n }))
    }
}

/// Sleeps, then fails with a validation error.
struct SlowFailure {
    calls: AtomicU32,
}

#[async_trait]
impl Fetcher for SlowFailure {
    async fn fetch(&self) -> Result<serde_json::Value, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(UpstreamError::validation("unknown instance type"))
    }
}

fn coordinator() -> cloudfetch::FetchCoordinator {
    CloudFetch::builder()
        .resilience(
            ResilienceConfig::new().retry(
                RetryConfig::new()
                    .base_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(10))
                    .jitter(false),
            ),
        )
        .build()
        .unwrap()
}

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test]
async fn concurrent_callers_share_one_fetch() {
    let coordinator = coordinator();
    let fetcher = SlowFetcher::new(Duration::from_millis(50));

    let calls = (0..10).map(|_| {
        coordinator.get_or_fetch(
            Provider::Aws,
            ServiceType::Compute,
            "us-east-1",
            Params::new(),
            &fetcher,
        )
    });
    let results = join_all(calls).await;

    assert_eq!(fetcher.calls(), 1);
    for result in &results {
        let envelope = result.as_ref().unwrap();
        assert_eq!(*envelope.data, serde_json::json!({ "call": 1 }));
        assert!(!envelope.degraded);
    }
    let fresh = results
        .iter()
        .filter(|r| r.as_ref().is_ok_and(|e| e.source == Source::Fresh))
        .count();
    assert!(fresh >= 1);
}

#[tokio::test]
async fn distinct_keys_fetch_independently() {
    let coordinator = coordinator();
    let fetcher = SlowFetcher::new(Duration::from_millis(20));

    let calls = ["us-east-1", "us-west-2", "eu-west-1"].map(|region| {
        coordinator.get_or_fetch(
            Provider::Aws,
            ServiceType::Compute,
            region,
            Params::new(),
            &fetcher,
        )
    });
    let results = join_all(calls).await;

    assert_eq!(fetcher.calls(), 3);
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn params_distinguish_keys() {
    let coordinator = coordinator();
    let fetcher = SlowFetcher::new(Duration::ZERO);
    let params = |size: &str| -> Params {
        [("instance_type".to_owned(), size.to_owned())].into_iter().collect()
    };

    coordinator
        .get_or_fetch(Provider::Gcp, ServiceType::Compute, "us-central1", params("e2-small"), &fetcher)
        .await
        .unwrap();
    let other = coordinator
        .get_or_fetch(Provider::Gcp, ServiceType::Compute, "us-central1", params("n2-standard-4"), &fetcher)
        .await
        .unwrap();

    assert_eq!(other.source, Source::Fresh);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn failure_reaches_every_waiter() {
    let coordinator = coordinator();
    let fetcher = SlowFailure {
        calls: AtomicU32::new(0),
    };

    let calls = (0..5).map(|_| {
        coordinator.get_or_fetch(
            Provider::Azure,
            ServiceType::Pricing,
            "eastus",
            Params::new(),
            &fetcher,
        )
    });
    let results = join_all(calls).await;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert!(matches!(result, Err(FetchError::Upstream(_))));
    }
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn cached_value_is_reused() {
    let coordinator = coordinator();
    let fetcher = SlowFetcher::new(Duration::ZERO);

    let first = coordinator
        .get_or_fetch(Provider::Ibm, ServiceType::Storage, "us-south", Params::new(), &fetcher)
        .await
        .unwrap();
    let second = coordinator
        .get_or_fetch(Provider::Ibm, ServiceType::Storage, "us-south", Params::new(), &fetcher)
        .await
        .unwrap();

    assert_eq!(first.source, Source::Fresh);
    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.data, first.data);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn ttl_override_expires_entry() {
    let coordinator = coordinator();
    let fetcher = SlowFetcher::new(Duration::ZERO);
    let request = FetchRequest::new(CacheKey::new(Provider::Alibaba, ServiceType::Pricing, "cn-hangzhou"))
        .ttl(Duration::from_millis(30));

    coordinator.fetch(request.clone(), &fetcher).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let again = coordinator.fetch(request, &fetcher).await.unwrap();

    assert_eq!(again.source, Source::Fresh);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn invalidate_by_tag_and_provider() {
    let coordinator = coordinator();
    let fetcher = SlowFetcher::new(Duration::ZERO);

    let tagged = FetchRequest::new(CacheKey::new(Provider::Aws, ServiceType::Pricing, "us-east-1"))
        .tag("pricing-catalog");
    let untagged = FetchRequest::new(CacheKey::new(Provider::Aws, ServiceType::Compute, "us-east-1"));
    let other = FetchRequest::new(CacheKey::new(Provider::Gcp, ServiceType::Compute, "us-east1"));
    for request in [&tagged, &untagged, &other] {
        coordinator.fetch(request.clone(), &fetcher).await.unwrap();
    }

    assert_eq!(coordinator.invalidate_tag("pricing-catalog"), 1);
    assert_eq!(coordinator.invalidate_provider(Provider::Aws), 1);
    assert!(coordinator.invalidate(&other.key));
    assert!(coordinator.cache().is_empty());
}

#[tokio::test]
async fn clones_share_state() {
    let coordinator = coordinator();
    let clone = coordinator.clone();
    let fetcher = SlowFetcher::new(Duration::ZERO);

    coordinator
        .get_or_fetch(Provider::Azure, ServiceType::Database, "westeurope", Params::new(), &fetcher)
        .await
        .unwrap();
    let from_clone = clone
        .get_or_fetch(Provider::Azure, ServiceType::Database, "westeurope", Params::new(), &fetcher)
        .await
        .unwrap();

    assert_eq!(from_clone.source, Source::Cache);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn single_miss_is_counted_once() {
    let coordinator = coordinator();
    let fetcher = SlowFetcher::new(Duration::ZERO);

    coordinator
        .get_or_fetch(Provider::Gcp, ServiceType::Database, "europe-west1", Params::new(), &fetcher)
        .await
        .unwrap();

    let stats = coordinator.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.insertions, 1);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn rate_limited_refresh_serves_stale() {
    let coordinator = CloudFetch::builder()
        .rate_limit(RateLimitConfig::new().calls_per_second(1).burst(1))
        .resilience(ResilienceConfig::new().retry(RetryConfig::disabled()))
        .build()
        .unwrap();
    let fetcher = SlowFetcher::new(Duration::ZERO);
    let request = FetchRequest::new(CacheKey::new(Provider::Aws, ServiceType::Pricing, "us-east-1"));

    let fresh = coordinator.fetch(request.clone(), &fetcher).await.unwrap();
    let refreshed = coordinator.refresh(request, &fetcher).await.unwrap();

    assert_eq!(refreshed.source, Source::StaleFallback);
    assert!(refreshed.degraded);
    assert_eq!(refreshed.data, fresh.data);
    assert!(
        refreshed
            .warnings
            .iter()
            .any(|w| w.contains("provider rate limit reached"))
    );
    assert!(refreshed.error.as_deref().unwrap().contains("rate limit"));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn denied_admission_waits_for_window() {
    let coordinator = CloudFetch::builder()
        .rate_limit(
            RateLimitConfig::new()
                .calls_per_second(1)
                .burst(1)
                .window(Duration::from_millis(100))
                .burst_window(Duration::from_millis(100)),
        )
        .resilience(
            ResilienceConfig::new().retry(
                RetryConfig::new()
                    .max_attempts(2)
                    .base_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(250))
                    .jitter(false),
            ),
        )
        .build()
        .unwrap();
    let fetcher = SlowFetcher::new(Duration::ZERO);

    coordinator
        .get_or_fetch(Provider::Azure, ServiceType::Pricing, "eastus", Params::new(), &fetcher)
        .await
        .unwrap();
    let started = std::time::Instant::now();
    let second = coordinator
        .get_or_fetch(Provider::Azure, ServiceType::Pricing, "westus", Params::new(), &fetcher)
        .await
        .unwrap();

    assert_eq!(second.source, Source::Fresh);
    assert!(!second.degraded);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(fetcher.calls(), 2);
}
