//! HTTP client for JSON APIs with rate limiting and bounded retries.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{FetchError, FetchResult};
use crate::rate_limit::{backoff_delay, parse_retry_after, RateLimiter};

pub const USER_AGENT: &str = concat!(
    "legiscache/",
    env!("CARGO_PKG_VERSION"),
    " (public legislative data cache)"
);

/// How hard to retry a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Rate-limited GET client shared by all sources.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(
        rate_limiter: RateLimiter,
        timeout: Duration,
        user_agent: Option<&str>,
        retry: RetryPolicy,
    ) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent.unwrap_or(USER_AGENT))
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rate_limiter,
            retry,
        })
    }

    /// Get the rate limiter for this client.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// GET `url` with `query` as JSON, charging each attempt to `source`'s
    /// rate budget.
    ///
    /// Transient failures are retried with exponential backoff, or after the
    /// server's `Retry-After` when it sends one. Non-transient failures
    /// return immediately.
    pub async fn get_json(
        &self,
        source: &str,
        url: &str,
        query: &[(String, String)],
    ) -> FetchResult<Value> {
        self.get_with(source, url, query, Ok).await
    }

    /// Like [`get_json`](Self::get_json), but `parse` also runs inside the
    /// retry loop, so a response of the wrong shape is retried like a
    /// malformed one.
    pub async fn get_with<T, F>(
        &self,
        source: &str,
        url: &str,
        query: &[(String, String)],
        parse: F,
    ) -> FetchResult<T>
    where
        F: Fn(Value) -> FetchResult<T>,
    {
        let mut attempt = 0u32;
        loop {
            let (result, retry_after) = self.attempt(source, url, query).await;
            let result = result.and_then(&parse);
            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= self.retry.max_retries {
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            let delay = retry_after
                .unwrap_or_else(|| backoff_delay(attempt, self.retry.base_delay_ms));
            warn!(
                "[{}] {} (attempt {}/{}), retrying in {:?}",
                source,
                err,
                attempt + 1,
                self.retry.max_retries + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        source: &str,
        url: &str,
        query: &[(String, String)],
    ) -> (FetchResult<Value>, Option<Duration>) {
        let waited = self.rate_limiter.acquire(source).await;
        if !waited.is_zero() {
            debug!("[{}] Rate limited, waited {:?}", source, waited);
        }

        let response = match self.client.get(url).query(query).send().await {
            Ok(r) => r,
            Err(e) => return (Err(e.into()), None),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = if status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::SERVICE_UNAVAILABLE
            {
                parse_retry_after(
                    response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                )
            } else {
                None
            };
            return (
                Err(FetchError::Status {
                    status: status.as_u16(),
                    url: response.url().to_string(),
                }),
                retry_after,
            );
        }

        let final_url = response.url().to_string();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return (Err(e.into()), None),
        };
        let parsed = serde_json::from_str(&text).map_err(|e| FetchError::Decode {
            url: final_url,
            reason: e.to_string(),
        });
        (parsed, None)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
