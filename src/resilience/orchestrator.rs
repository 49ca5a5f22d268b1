//! Rate limit → circuit breaker → retry → stale fallback, around one fetch.
//!
//! [`ResilienceOrchestrator::execute`] runs a [`Fetcher`] for one
//! [`FetchRequest`]:
//!
//! 1. An open circuit short-circuits straight to fallback.
//! 2. Each attempt is admitted by the rate limiter. A denial is waited out
//!    if attempts remain and the wait fits under `max_delay`; otherwise the
//!    request falls back.
//! 3. The attempt runs under a breaker permit and `call_timeout`.
//! 4. Retryable failures back off per [`RetryConfig::backoff`]. Auth and
//!    validation failures propagate at once, without fallback.
//! 5. Success writes the payload to the cache.
//!
//! Fallback serves whatever the cache still holds for the key (stale reads
//! allowed) as a degraded envelope, or returns a typed error if it holds
//! nothing. When the request's own failures open the circuit, the fallback
//! still carries the last upstream error rather than `CircuitOpen`, which is
//! reserved for requests refused without calling upstream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use super::{CircuitBreaker, ResilienceConfig};
use crate::cache::{CacheStore, TtlPolicy};
use crate::limiter::{Admission, RateLimiter};
use crate::policy::PolicyTable;
use crate::telemetry;
use crate::traits::Fetcher;
use crate::types::{CacheKey, DegradeCause, FetchEnvelope, FetchRequest};
use crate::{FetchError, Result, UpstreamError};

/// Composes the cache, rate limiter and circuit breaker around fetches.
pub struct ResilienceOrchestrator {
    cache: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    ttl: TtlPolicy,
    policies: PolicyTable<ResilienceConfig>,
}

impl ResilienceOrchestrator {
    pub fn new(
        cache: Arc<CacheStore>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        ttl: TtlPolicy,
        policies: PolicyTable<ResilienceConfig>,
    ) -> Self {
        Self {
            cache,
            limiter,
            breaker,
            ttl,
            policies,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn policies(&self) -> &PolicyTable<ResilienceConfig> {
        &self.policies
    }

    /// Fetch `request` with retries, writing the result to the cache.
    ///
    /// Never reads the cache for fresh data; only the fallback path reads
    /// it.
    #[instrument(skip(self, request, fetcher), fields(key = %request.key))]
    pub async fn execute<F>(&self, request: &FetchRequest, fetcher: &F) -> Result<FetchEnvelope>
    where
        F: Fetcher + ?Sized,
    {
        let key = &request.key;
        let (provider, service) = (key.provider(), key.service());
        let config = self.policies.resolve(provider, service);
        let retry = &config.retry;
        let circuit = request.circuit_name();

        if !self.breaker.is_call_permitted(&circuit) {
            let err = FetchError::CircuitOpen {
                retry_in: self.breaker.retry_in(&circuit),
                service: circuit,
            };
            return self.fallback(request, DegradeCause::CircuitOpen, err);
        }

        let mut last_err = None;
        for attempt in 0..retry.max_attempts {
            let attempts_left = attempt + 1 < retry.max_attempts;

            if let Admission::Denied { retry_after } = self.limiter.admit(provider, service) {
                let err = FetchError::RateLimitExceeded {
                    key: key.to_string(),
                    retry_after,
                };
                if !attempts_left || retry_after > retry.max_delay {
                    return self.fallback(request, DegradeCause::RateLimited, err);
                }
                debug!(
                    attempt = attempt + 1,
                    wait_ms = retry_after.as_millis() as u64,
                    "waiting for rate limit window"
                );
                tokio::time::sleep(retry_after).await;
                last_err = Some((DegradeCause::RateLimited, err));
                continue;
            }

            let permit = match self.breaker.acquire_with(&circuit, &config.circuit) {
                Ok(permit) => permit,
                Err(err) => {
                    // Another caller opened the circuit between attempts; keep
                    // this request's own upstream failure if it had one.
                    let err = match last_err {
                        Some((_, upstream @ FetchError::Upstream(_))) => upstream,
                        _ => err,
                    };
                    return self.fallback(request, DegradeCause::CircuitOpen, err);
                }
            };

            match self.call(key, config.call_timeout, fetcher).await {
                Ok(value) => {
                    permit.success();
                    let payload = Arc::new(value);
                    let ttl = request.ttl.unwrap_or_else(|| self.ttl.ttl_for(service));
                    self.cache
                        .set(key.clone(), Arc::clone(&payload), ttl, request.tags.clone());
                    return Ok(FetchEnvelope::fresh(key.to_string(), payload));
                }
                Err(e) => {
                    if e.trips_breaker() {
                        permit.failure();
                    } else {
                        permit.release();
                    }
                    if !e.is_retryable() {
                        return Err(e.into());
                    }
                    if !self.breaker.is_call_permitted(&circuit) {
                        return self.fallback(
                            request,
                            DegradeCause::CircuitOpen,
                            FetchError::Upstream(e),
                        );
                    }
                    if attempts_left {
                        let delay = retry.backoff(e.kind, attempt, e.retry_after);
                        metrics::counter!(telemetry::RETRIES_TOTAL,
                            "provider" => provider.as_str(),
                            "service" => service.as_str(),
                        )
                        .increment(1);
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = retry.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying after upstream error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some((DegradeCause::FetchError, FetchError::Upstream(e)));
                }
            }
        }

        let (cause, err) = last_err.unwrap_or_else(|| {
            (
                DegradeCause::FetchError,
                FetchError::Configuration("no fetch attempts configured".into()),
            )
        });
        self.fallback(request, cause, err)
    }

    /// One bounded fetch attempt, with upstream metrics.
    async fn call<F>(
        &self,
        key: &CacheKey,
        timeout: Duration,
        fetcher: &F,
    ) -> std::result::Result<serde_json::Value, UpstreamError>
    where
        F: Fetcher + ?Sized,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, fetcher.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::timeout(timeout)),
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind.as_str(),
        };
        let (provider, service) = (key.provider().as_str(), key.service().as_str());
        metrics::counter!(telemetry::UPSTREAM_REQUESTS_TOTAL,
            "provider" => provider,
            "service" => service,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::UPSTREAM_DURATION_SECONDS,
            "provider" => provider,
            "service" => service,
        )
        .record(start.elapsed().as_secs_f64());
        result
    }

    /// Serve cached data for `request` as degraded, or surface `err`.
    fn fallback(
        &self,
        request: &FetchRequest,
        cause: DegradeCause,
        err: FetchError,
    ) -> Result<FetchEnvelope> {
        let key = &request.key;
        let Some(hit) = self.cache.get(key, true) else {
            return Err(match err {
                e @ (FetchError::RateLimitExceeded { .. } | FetchError::CircuitOpen { .. }) => e,
                other => FetchError::NoFallbackAvailable {
                    key: key.to_string(),
                    cause: Box::new(other),
                },
            });
        };

        metrics::counter!(telemetry::STALE_SERVED_TOTAL,
            "provider" => key.provider().as_str(),
            "service" => key.service().as_str(),
            "cause" => cause.as_str(),
        )
        .increment(1);
        warn!(
            key = %key,
            cause = cause.as_str(),
            age_ms = hit.age.as_millis() as u64,
            error = %err,
            "serving stale data"
        );
        Ok(FetchEnvelope::stale(
            key.to_string(),
            hit.payload,
            hit.age,
            cause,
            err.to_string(),
        ))
    }
}

impl std::fmt::Debug for ResilienceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceOrchestrator")
            .field("cache", &self.cache)
            .field("limiter", &self.limiter)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}
