//! Core Fetcher trait

use std::future::Future;

use async_trait::async_trait;

use crate::UpstreamError;

/// A provider fetch operation.
///
/// Called zero or more times per request: once per attempt, never
/// concurrently for the same cache key. Implementations perform the
/// provider call and map provider failures into [`UpstreamError`] kinds.
///
/// Any `Fn() -> impl Future<Output = Result<Value, UpstreamError>>` closure
/// whose future owns its data is a `Fetcher`:
///
/// ```rust
/// # use cloudfetch::{Fetcher, UpstreamError};
/// let fetcher = || async { Ok::<_, UpstreamError>(serde_json::json!({"price": 0.0416})) };
/// # fn assert_fetcher<F: Fetcher>(_: &F) {}
/// # assert_fetcher(&fetcher);
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<serde_json::Value, UpstreamError>;
}

#[async_trait]
impl<F, Fut> Fetcher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, UpstreamError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<serde_json::Value, UpstreamError> {
        (self)().await
    }
}
