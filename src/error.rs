//! cloudfetch error types

use std::fmt;
use std::time::Duration;

/// Failure class of an upstream provider call. Drives retry and breaker
/// decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamKind {
    /// Provider signalled rate limiting (HTTP 429, throttling exceptions).
    Throttling,
    /// Server-side or network failure, including per-call timeouts.
    Transient,
    /// Credentials rejected.
    Authentication,
    /// Request rejected as malformed or referring to something that does not exist.
    Validation,
    /// Anything the classifier could not place.
    Unknown,
}

impl UpstreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamKind::Throttling => "throttling",
            UpstreamKind::Transient => "transient",
            UpstreamKind::Authentication => "authentication",
            UpstreamKind::Validation => "validation",
            UpstreamKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a provider fetch operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} upstream error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct UpstreamError {
    pub kind: UpstreamKind,
    pub message: String,
    /// HTTP status, when the failure came from an HTTP response.
    pub status: Option<u16>,
    /// Provider hint for how long to wait before retrying.
    pub retry_after: Option<Duration>,
}

impl UpstreamError {
    pub fn new(kind: UpstreamKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Throttling, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Transient, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Authentication, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Validation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(UpstreamKind::Unknown, message)
    }

    /// A per-call timeout. Treated as transient.
    pub fn timeout(after: Duration) -> Self {
        Self::transient(format!("call timed out after {}ms", after.as_millis()))
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => UpstreamKind::Throttling,
            408 | 500..=599 => UpstreamKind::Transient,
            401 | 403 => UpstreamKind::Authentication,
            400 | 404 | 405 | 409 | 410 | 422 => UpstreamKind::Validation,
            _ => UpstreamKind::Unknown,
        };
        Self::new(kind, message).with_status(status)
    }

    /// Classify a free-form provider error message (SDK exception text and the
    /// like) by keyword.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let msg = message.to_ascii_lowercase();
        let kind = if msg.contains("throttl")
            || msg.contains("rate limit")
            || msg.contains("rate exceeded")
            || msg.contains("too many requests")
            || msg.contains("429")
        {
            UpstreamKind::Throttling
        } else if msg.contains("unauthorized")
            || msg.contains("forbidden")
            || msg.contains("access denied")
            || msg.contains("invalid credentials")
            || msg.contains("401")
            || msg.contains("403")
        {
            UpstreamKind::Authentication
        } else if msg.contains("timeout")
            || msg.contains("timed out")
            || msg.contains("unavailable")
            || msg.contains("connection")
            || msg.contains("internal error")
            || msg.contains("503")
            || msg.contains("502")
            || msg.contains("500")
        {
            UpstreamKind::Transient
        } else if msg.contains("invalid")
            || msg.contains("validation")
            || msg.contains("not found")
            || msg.contains("400")
            || msg.contains("404")
        {
            UpstreamKind::Validation
        } else {
            UpstreamKind::Unknown
        };
        Self::new(kind, message)
    }

    /// Whether retrying could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            UpstreamKind::Authentication | UpstreamKind::Validation
        )
    }

    /// Whether this failure counts against the provider's circuit breaker.
    /// Validation failures are the caller's fault and say nothing about
    /// provider health.
    pub fn trips_breaker(&self) -> bool {
        self.kind != UpstreamKind::Validation
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if let Some(status) = err.status() {
            UpstreamError::from_status(status.as_u16(), message)
        } else if err.is_timeout() || err.is_connect() || err.is_request() {
            UpstreamError::transient(message)
        } else if err.is_decode() || err.is_body() {
            UpstreamError::unknown(message)
        } else {
            UpstreamError::classify(message)
        }
    }
}

/// cloudfetch error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Admission denied and no budget left to wait.
    #[error("rate limit exceeded for {key}, retry after {retry_after:?}")]
    RateLimitExceeded { key: String, retry_after: Duration },

    /// Breaker is open; the operation was not attempted.
    #[error("circuit open for {service}, retry in {retry_in:?}")]
    CircuitOpen { service: String, retry_in: Duration },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Upstream failed and nothing is cached to fall back on.
    #[error("no fallback available for {key}: {cause}")]
    NoFallbackAvailable {
        key: String,
        #[source]
        cause: Box<FetchError>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl FetchError {
    /// The upstream error at the root of this failure, if any.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            FetchError::Upstream(e) => Some(e),
            FetchError::NoFallbackAvailable { cause, .. } => cause.upstream(),
            _ => None,
        }
    }

    /// Whether the caller may reasonably try again later.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimitExceeded { .. } | FetchError::CircuitOpen { .. } => true,
            FetchError::Upstream(e) => e.is_retryable(),
            FetchError::NoFallbackAvailable { cause, .. } => cause.is_transient(),
            FetchError::Configuration(_) => false,
        }
    }

    /// How long the caller should wait, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            FetchError::CircuitOpen { retry_in, .. } => Some(*retry_in),
            FetchError::Upstream(e) => e.retry_after,
            FetchError::NoFallbackAvailable { cause, .. } => cause.retry_after(),
            FetchError::Configuration(_) => None,
        }
    }
}

/// Result type alias for cloudfetch operations
pub type Result<T> = std::result::Result<T, FetchError>;
