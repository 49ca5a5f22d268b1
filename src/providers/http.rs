//! JSON-over-HTTP fetcher.
//!
//! Issues a GET against a provider endpoint and maps the response into the
//! [`UpstreamError`] taxonomy:
//!
//! | response                         | kind           |
//! |----------------------------------|----------------|
//! | 429                              | throttling     |
//! | 408, 5xx, connect/timeout errors | transient      |
//! | 401, 403                         | authentication |
//! | 400, 404, 405, 409, 410, 422     | validation     |
//! | anything else                    | unknown        |
//!
//! A `Retry-After` header in seconds is carried on the error as a backoff
//! hint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;

use crate::UpstreamError;
use crate::traits::Fetcher;

/// Longest error body quoted in an [`UpstreamError`] message.
const MAX_ERROR_BODY: usize = 256;

/// Fetches a JSON document with a GET request.
///
/// ```rust
/// # use cloudfetch::providers::HttpFetcher;
/// let fetcher = HttpFetcher::new("https://pricing.us-east-1.amazonaws.com/offers/v1.0/aws/index.json")
///     .query("region", "us-east-1")
///     .header("accept", "application/json");
/// assert!(fetcher.url().ends_with("index.json"));
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    bearer: Option<String>,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    /// Use a shared client (connection pool, proxies, TLS settings).
    pub fn with_client(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            bearer: None,
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check response status and map to the matching upstream error.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("provider returned {status}")
        } else {
            format!("provider returned {status}: {}", truncate(&body, MAX_ERROR_BODY))
        };

        let err = UpstreamError::from_status(status.as_u16(), message);
        Err(match retry_after {
            Some(after) => err.with_retry_after(after),
            None => err,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self) -> Result<serde_json::Value, UpstreamError> {
        let mut request = self.http.get(&self.url).query(&self.query);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é");
    }
}
