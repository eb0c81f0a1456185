//! Redis shared tier.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;

use super::shared::{CacheTierError, CacheTierResult, SharedCacheTier, SharedEntry};

/// Key prefix for cached values in Redis.
const KEY_PREFIX: &str = "legiscache:cache:";

/// `COUNT` hint per `SCAN` step when clearing by pattern.
const SCAN_BATCH: usize = 500;

/// Shared tier backed by Redis. The connection is opened on first use so a
/// server can start while Redis is down.
pub struct RedisCacheTier {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisCacheTier {
    pub fn new(redis_url: &str) -> CacheTierResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheTierError::Unavailable(format!("Redis connection error: {}", e)))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> CacheTierResult<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone()).await.map_err(|e| {
                    CacheTierError::Unavailable(format!("Redis connection manager error: {}", e))
                })
            })
            .await?;
        Ok(conn.clone())
    }

    fn full_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

fn backend_err(e: redis::RedisError) -> CacheTierError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        CacheTierError::Unavailable(e.to_string())
    } else {
        CacheTierError::Backend(e.to_string())
    }
}

/// Escape glob metacharacters so only our trailing `*` is a wildcard.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl SharedCacheTier for RedisCacheTier {
    async fn ping(&self) -> CacheTierResult<()> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheTierResult<Option<SharedEntry>> {
        let mut conn = self.connection().await?;
        let full = Self::full_key(key);

        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .get(&full)
            .pttl(&full)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        Ok(value.map(|value| SharedEntry {
            value,
            // -1: no expiry, -2: gone between the two commands.
            ttl: (pttl > 0).then(|| Duration::from_millis(pttl as u64)),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheTierResult<()> {
        let mut conn = self.connection().await?;
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(Self::full_key(key), value, secs)
            .await
            .map_err(backend_err)
    }

    async fn delete(&self, key: &str) -> CacheTierResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(Self::full_key(key))
            .await
            .map_err(backend_err)
    }

    /// Walks the keyspace with `SCAN`, deleting each batch as it arrives.
    async fn delete_matching(&self, pattern: &str) -> CacheTierResult<usize> {
        let mut conn = self.connection().await?;
        let match_pattern = scan_pattern(pattern);

        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&match_pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;

            if !keys.is_empty() {
                let n: usize = conn.del(&keys).await.map_err(backend_err)?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    fn name(&self) -> &str {
        "redis"
    }
}

/// Namespaced `MATCH` pattern for a `prefix*` or exact-key pattern.
fn scan_pattern(pattern: &str) -> String {
    match pattern.strip_suffix('*') {
        Some(prefix) => format!("{}{}*", KEY_PREFIX, escape_glob(prefix)),
        None => format!("{}{}", KEY_PREFIX, escape_glob(pattern)),
    }
}
