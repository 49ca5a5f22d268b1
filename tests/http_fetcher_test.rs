//! Wiremock integration tests for HttpFetcher.
//!
//! These tests verify the request shape and the mapping of HTTP failures
//! onto upstream error kinds.

use std::time::Duration;

use cloudfetch::providers::HttpFetcher;
use cloudfetch::{
    CloudFetch, Fetcher, Params, Provider, ResilienceConfig, RetryConfig, ServiceType, Source,
    UpstreamKind,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test successful fetch with query, header and bearer token.
#[tokio::test]
async fn test_fetch_success() {
    let mock_server = MockServer::start().await;
    let body = serde_json::json!({
        "Items": [{"armSkuName": "Standard_D2s_v3", "retailPrice": 0.096}]
    });

    Mock::given(method("GET"))
        .and(path("/api/retail/prices"))
        .and(query_param("currencyCode", "USD"))
        .and(header("Authorization", "Bearer test_token"))
        .and(header("x-client", "cloudfetch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(format!("{}/api/retail/prices", mock_server.uri()))
        .query("currencyCode", "USD")
        .header("x-client", "cloudfetch")
        .bearer_token("test_token");

    let value = fetcher.fetch().await.expect("fetch should succeed");
    assert_eq!(value, body);
}

/// Test 429 maps to throttling and carries Retry-After.
#[tokio::test]
async fn test_rate_limited_with_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("slow down"),
        )
        .mount(&mock_server)
        .await;

    let err = HttpFetcher::new(mock_server.uri()).fetch().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Throttling);
    assert_eq!(err.status, Some(429));
    assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
    assert!(err.message.contains("slow down"));
    assert!(err.is_retryable());
}

/// Test 503 maps to transient.
#[tokio::test]
async fn test_service_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let err = HttpFetcher::new(mock_server.uri()).fetch().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Transient);
    assert_eq!(err.status, Some(503));
    assert_eq!(err.retry_after, None);
}

/// Test 401 maps to authentication.
#[tokio::test]
async fn test_unauthorized() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&mock_server)
        .await;

    let err = HttpFetcher::new(mock_server.uri()).fetch().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Authentication);
    assert!(!err.is_retryable());
}

/// Test 404 maps to validation.
#[tokio::test]
async fn test_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let err = HttpFetcher::new(mock_server.uri()).fetch().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Validation);
    assert!(!err.trips_breaker());
}

/// Test a body that is not JSON.
#[tokio::test]
async fn test_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&mock_server)
        .await;

    let err = HttpFetcher::new(mock_server.uri()).fetch().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Unknown);
}

/// Test a connection failure maps to transient.
#[tokio::test]
async fn test_connection_refused() {
    let uri = {
        let mock_server = MockServer::start().await;
        mock_server.uri()
    };

    let err = HttpFetcher::new(uri).fetch().await.unwrap_err();
    assert_eq!(err.kind, UpstreamKind::Transient);
}

/// Test transient failures are retried through the coordinator.
#[tokio::test]
async fn test_coordinator_retries_http_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"price": 1.5})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let coordinator = CloudFetch::builder()
        .resilience(
            ResilienceConfig::new().retry(
                RetryConfig::new()
                    .base_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(10))
                    .jitter(false),
            ),
        )
        .build()
        .unwrap();
    let fetcher = HttpFetcher::new(mock_server.uri());

    let envelope = coordinator
        .get_or_fetch(Provider::Gcp, ServiceType::Pricing, "us-central1", Params::new(), &fetcher)
        .await
        .expect("second attempt should succeed");
    assert_eq!(envelope.source, Source::Fresh);
    assert_eq!(*envelope.data, serde_json::json!({"price": 1.5}));
}
