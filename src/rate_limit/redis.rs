//! Redis-backed rate limiter for distributed multi-process coordination.
//!
//! Each source's window is a sorted set of request timestamps; an atomic Lua
//! script prunes, checks and records in one round trip.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::backend::{RateLimitBackend, RateLimitError, RateLimitResult};
use super::config::{RateLimitConfig, SourceStats};

/// Key prefix for rate limit data in Redis.
const KEY_PREFIX: &str = "legiscache:ratelimit:";

/// Prune, check and record. Returns the wait in ms (0 when recorded).
const ACQUIRE_SCRIPT: &str = r#"
    local key = KEYS[1]
    local now_ms = tonumber(ARGV[1])
    local window_ms = tonumber(ARGV[2])
    local max_requests = tonumber(ARGV[3])
    local member = ARGV[4]

    redis.call('ZREMRANGEBYSCORE', key, '-inf', now_ms - window_ms)

    local count = redis.call('ZCARD', key)
    if count < max_requests then
        redis.call('ZADD', key, now_ms, member)
        redis.call('HINCRBY', key .. ':stats', 'total_requests', 1)
        redis.call('PEXPIRE', key, window_ms)
        return 0
    end

    redis.call('HINCRBY', key .. ':stats', 'throttled', 1)
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    local wait = tonumber(oldest[2]) + window_ms - now_ms
    if wait < 1 then
        wait = 1
    end
    return wait
"#;

/// Redis-backed rate limit storage.
pub struct RedisRateLimitBackend {
    conn: ConnectionManager,
}

impl RedisRateLimitBackend {
    /// Create a new Redis rate limit backend.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn new(redis_url: &str) -> RateLimitResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RateLimitError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            RateLimitError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn })
    }

    fn window_key(&self, source: &str) -> String {
        format!("{}window:{}", KEY_PREFIX, source)
    }
}

#[async_trait]
impl RateLimitBackend for RedisRateLimitBackend {
    async fn try_acquire(
        &self,
        source: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult<Duration> {
        let mut conn = self.conn.clone();
        let key = self.window_key(source);
        let now_ms = chrono::Utc::now().timestamp_millis();
        // Unique member so two requests in the same millisecond both count.
        let member = format!("{}:{}", now_ms, member_suffix());

        let wait_ms: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(&key)
            .arg(now_ms)
            .arg(config.window.as_millis() as i64)
            .arg(config.max_requests as i64)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        Ok(Duration::from_millis(wait_ms.max(0) as u64))
    }

    async fn stats(&self, source: &str) -> RateLimitResult<Option<SourceStats>> {
        let mut conn = self.conn.clone();
        let key = self.window_key(source);

        let (in_window, fields): (usize, Vec<Option<u64>>) = redis::pipe()
            .zcard(&key)
            .cmd("HMGET")
            .arg(format!("{}:stats", key))
            .arg("total_requests")
            .arg("throttled")
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        let total_requests = fields.first().copied().flatten();
        let throttled = fields.get(1).copied().flatten();
        if total_requests.is_none() && in_window == 0 {
            return Ok(None);
        }

        // Limits live in the caller's config, not in Redis.
        Ok(Some(SourceStats {
            max_requests: 0,
            window: Duration::ZERO,
            in_window,
            total_requests: total_requests.unwrap_or(0),
            throttled: throttled.unwrap_or(0),
        }))
    }
}

impl Clone for RedisRateLimitBackend {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

/// Process-local unique suffix for sorted-set members.
fn member_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
