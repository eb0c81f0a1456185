//! Rate limiting for outbound requests to upstream data sources.
//!
//! Sliding-window limiting per named source with pluggable backends:
//! - In-memory (default, ephemeral)
//! - Redis (distributed, multi-instance)

mod backend;
mod config;
mod limiter;
mod memory;

#[cfg(feature = "redis-backend")]
mod redis;

pub use backend::{RateLimitBackend, RateLimitError, RateLimitResult, RateWindow};
pub use config::{RateLimitConfig, SourceStats};
pub use limiter::{BoxedRateLimitBackend, RateLimiter};
pub use memory::InMemoryRateLimitBackend;

#[cfg(feature = "redis-backend")]
pub use redis::RedisRateLimitBackend;

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<std::time::Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| std::time::Duration::from_secs(secs.min(60)))
}

/// Calculate exponential backoff delay for a given attempt.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> std::time::Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    std::time::Duration::from_millis(delay_ms.min(60_000))
}

/// Build a limiter from a backend spec: `memory` (or empty) or a `redis://` URL.
pub async fn limiter_from_spec(spec: Option<&str>) -> anyhow::Result<RateLimiter> {
    match spec.map(str::trim).filter(|s| !s.is_empty()) {
        None | Some("memory") => Ok(RateLimiter::in_memory()),
        #[cfg(feature = "redis-backend")]
        Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
            let backend = RedisRateLimitBackend::new(url).await?;
            Ok(RateLimiter::new(std::sync::Arc::new(backend)))
        }
        Some(other) => anyhow::bail!(
            "Unsupported rate limit backend '{}' (expected 'memory'{})",
            other,
            if cfg!(feature = "redis-backend") {
                " or a redis:// URL"
            } else {
                "; build with the redis-backend feature for redis://"
            }
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("600")), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay(0, 100), Duration::from_millis(100));
        assert_eq!(backoff_delay(3, 100), Duration::from_millis(800));
        assert_eq!(backoff_delay(30, 100), Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn test_limiter_from_spec_memory() {
        assert!(limiter_from_spec(None).await.is_ok());
        assert!(limiter_from_spec(Some("memory")).await.is_ok());
        assert!(limiter_from_spec(Some("sqlite://x")).await.is_err());
    }
}
