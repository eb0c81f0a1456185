//! Dual-tier cache: an in-process fast tier in front of an optional shared
//! tier (Redis).
//!
//! The shared tier is strictly best-effort. When it is absent, down, or
//! erroring, every operation still succeeds against the fast tier alone and
//! the failure is logged at warning level.

mod memory;
mod probe;
#[cfg(feature = "redis-backend")]
mod redis;
pub mod response;
mod shared;

pub use memory::{pattern_matches, MemoryTier, DEFAULT_SWEEP_THRESHOLD};
pub use probe::{Reachability, DEFAULT_PROBE_INTERVAL};
#[cfg(feature = "redis-backend")]
pub use redis::RedisCacheTier;
pub use response::{build_key, KeySpec, ResponseCache, TtlClass, TtlPolicy};
pub use shared::{CacheTierError, CacheTierResult, SharedCacheTier, SharedEntry};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Upper bound on how long a value backfilled from the shared tier lives in
/// the fast tier.
pub const DEFAULT_BACKFILL_TTL: Duration = Duration::from_secs(300);

/// Type alias for a boxed shared tier.
pub type BoxedSharedTier = Arc<dyn SharedCacheTier>;

/// Construction options for [`DualTierCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub probe_interval: Duration,
    pub sweep_threshold: usize,
    pub backfill_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
            backfill_ttl: DEFAULT_BACKFILL_TTL,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    fast_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    shared_errors: AtomicU64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub fast_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub shared_errors: u64,
    pub fast_entries: usize,
    pub shared_tier: Option<String>,
    pub shared_reachable: Option<bool>,
}

/// Read/write cache fronting fetched or computed values.
pub struct DualTierCache {
    fast: MemoryTier,
    shared: Option<BoxedSharedTier>,
    probe: Reachability,
    backfill_ttl: Duration,
    counters: Counters,
}

impl DualTierCache {
    /// Fast tier only.
    pub fn memory_only() -> Self {
        Self::with_options(None, CacheOptions::default())
    }

    pub fn new(shared: Option<BoxedSharedTier>) -> Self {
        Self::with_options(shared, CacheOptions::default())
    }

    pub fn with_options(shared: Option<BoxedSharedTier>, options: CacheOptions) -> Self {
        Self {
            fast: MemoryTier::with_sweep_threshold(options.sweep_threshold),
            shared,
            probe: Reachability::new(options.probe_interval),
            backfill_ttl: options.backfill_ttl,
            counters: Counters::default(),
        }
    }

    /// Whether the shared tier is configured and currently believed up.
    ///
    /// Probes the tier at most once per probe interval; otherwise answers
    /// from the last probe or operation outcome.
    pub async fn is_shared_tier_reachable(&self) -> bool {
        let Some(shared) = &self.shared else {
            return false;
        };
        if let Some(reachable) = self.probe.cached() {
            return reachable;
        }

        let reachable = match shared.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Shared cache tier {} unreachable: {}", shared.name(), e);
                false
            }
        };
        if reachable && self.probe.last_known() == Some(false) {
            info!("Shared cache tier {} is reachable again", shared.name());
        }
        self.probe.record(reachable);
        reachable
    }

    /// The shared tier, if configured and reachable right now.
    async fn live_shared(&self) -> Option<&BoxedSharedTier> {
        if self.is_shared_tier_reachable().await {
            self.shared.as_ref()
        } else {
            None
        }
    }

    fn shared_failed(&self, shared: &BoxedSharedTier, op: &str, err: CacheTierError) {
        self.counters.shared_errors.fetch_add(1, Ordering::Relaxed);
        self.probe.mark_unreachable();
        warn!(
            "Shared cache tier {} failed on {} (continuing with fast tier only): {}",
            shared.name(),
            op,
            err
        );
    }

    /// Fast tier first; on a miss, the shared tier (if reachable), backfilling
    /// the fast tier on a hit there.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.fast.get(key) {
            self.counters.fast_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        if let Some(shared) = self.live_shared().await {
            match shared.get(key).await {
                Ok(Some(entry)) => match serde_json::from_str::<Value>(&entry.value) {
                    Ok(value) => {
                        let ttl = entry
                            .ttl
                            .map(|t| t.min(self.backfill_ttl))
                            .unwrap_or(self.backfill_ttl);
                        self.fast.set(key.to_string(), value.clone(), ttl);
                        self.counters.shared_hits.fetch_add(1, Ordering::Relaxed);
                        debug!("Shared tier hit for {} (backfilled for {:?})", key, ttl);
                        return Some(value);
                    }
                    Err(e) => {
                        warn!("Ignoring undecodable shared cache value for {}: {}", key, e);
                    }
                },
                Ok(None) => {}
                Err(e) => self.shared_failed(shared, "get", e),
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write to the fast tier unconditionally, then best-effort to the
    /// shared tier.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let encoded = if self.shared.is_some() {
            serde_json::to_string(&value).ok()
        } else {
            None
        };

        self.fast.set(key.to_string(), value, ttl);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        if let (Some(encoded), Some(shared)) = (encoded, self.live_shared().await) {
            if let Err(e) = shared.set(key, &encoded, ttl).await {
                self.shared_failed(shared, "set", e);
            }
        }
    }

    /// Remove a key from both tiers independently.
    pub async fn delete(&self, key: &str) {
        self.fast.delete(key);
        if let Some(shared) = self.live_shared().await {
            if let Err(e) = shared.delete(key).await {
                self.shared_failed(shared, "delete", e);
            }
        }
    }

    /// Remove every key matching a prefix-style pattern (`foo:*`) from both
    /// tiers. Returns how many fast-tier entries were removed.
    pub async fn clear_matching(&self, pattern: &str) -> usize {
        let removed = self.fast.clear_matching(pattern);
        if let Some(shared) = self.live_shared().await {
            match shared.delete_matching(pattern).await {
                Ok(n) => debug!("Cleared {} shared entries matching {}", n, pattern),
                Err(e) => self.shared_failed(shared, "clear_matching", e),
            }
        }
        debug!("Cleared {} fast entries matching {}", removed, pattern);
        removed
    }

    /// Reclaim memory held by expired fast-tier entries.
    pub fn sweep_expired(&self) -> usize {
        self.fast.sweep_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fast_hits: self.counters.fast_hits.load(Ordering::Relaxed),
            shared_hits: self.counters.shared_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            shared_errors: self.counters.shared_errors.load(Ordering::Relaxed),
            fast_entries: self.fast.len(),
            shared_tier: self.shared.as_ref().map(|s| s.name().to_string()),
            shared_reachable: self.shared.as_ref().and_then(|_| self.probe.last_known()),
        }
    }

    /// Log final statistics and drop the fast tier.
    pub async fn shutdown(&self) {
        let stats = self.stats();
        info!(
            "Cache shutdown: {} fast hits, {} shared hits, {} misses, {} shared errors",
            stats.fast_hits, stats.shared_hits, stats.misses, stats.shared_errors
        );
        self.fast.clear();
    }
}

impl std::fmt::Debug for DualTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualTierCache")
            .field("shared", &self.shared.as_ref().map(|s| s.name().to_string()))
            .field("backfill_ttl", &self.backfill_ttl)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_tiers::LocalTier;
    use super::*;
    use serde_json::json;

    fn cache_with(tier: Arc<LocalTier>, probe_interval: Duration) -> DualTierCache {
        DualTierCache::with_options(
            Some(tier),
            CacheOptions {
                probe_interval,
                ..CacheOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_set_then_get_returns_value() {
        let cache = DualTierCache::memory_only();
        cache
            .set("bills:congress=118", json!({"count": 3}), Duration::from_secs(60))
            .await;
        assert_eq!(
            cache.get("bills:congress=118").await,
            Some(json!({"count": 3}))
        );
    }

    #[tokio::test]
    async fn test_get_after_ttl_is_miss() {
        let cache = DualTierCache::memory_only();
        cache.set("k", json!(1), Duration::from_millis(30)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_set_mirrors_to_shared_tier() {
        let tier = Arc::new(LocalTier::default());
        let cache = cache_with(tier.clone(), Duration::from_secs(60));

        cache.set("k", json!("v"), Duration::from_secs(60)).await;
        assert!(tier.contains("k").await);
    }

    #[tokio::test]
    async fn test_shared_hit_backfills_fast_tier() {
        let tier = Arc::new(LocalTier::default());
        tier.set("k", "\"from-redis\"", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = cache_with(tier.clone(), Duration::from_secs(60));

        assert_eq!(cache.get("k").await, Some(json!("from-redis")));
        // Second read is served by the fast tier.
        let calls_before = tier.calls.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(cache.get("k").await, Some(json!("from-redis")));
        assert_eq!(
            tier.calls.load(std::sync::atomic::Ordering::SeqCst),
            calls_before
        );

        let stats = cache.stats();
        assert_eq!(stats.shared_hits, 1);
        assert_eq!(stats.fast_hits, 1);
    }

    #[tokio::test]
    async fn test_degraded_mode_all_operations_succeed() {
        let tier = Arc::new(LocalTier::default());
        tier.down.store(true, std::sync::atomic::Ordering::SeqCst);
        let cache = cache_with(tier.clone(), Duration::from_secs(60));

        cache.set("a", json!(1), Duration::from_secs(60)).await;
        cache.set("b:1", json!(2), Duration::from_secs(60)).await;
        assert_eq!(cache.get("a").await, Some(json!(1)));
        assert_eq!(cache.get("missing").await, None);
        cache.delete("a").await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.clear_matching("b:*").await, 1);

        assert!(!cache.is_shared_tier_reachable().await);
        assert_eq!(cache.stats().shared_reachable, Some(false));
    }

    #[tokio::test]
    async fn test_probe_is_cached_during_outage() {
        let tier = Arc::new(LocalTier::default());
        tier.down.store(true, std::sync::atomic::Ordering::SeqCst);
        let cache = cache_with(tier.clone(), Duration::from_secs(60));

        for i in 0..20 {
            cache
                .set(&format!("k{}", i), json!(i), Duration::from_secs(60))
                .await;
            cache.get("nothing").await;
        }

        assert_eq!(tier.pings.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(tier.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_operation_failure_marks_tier_down() {
        let tier = Arc::new(LocalTier::default());
        let cache = cache_with(tier.clone(), Duration::from_secs(60));
        assert!(cache.is_shared_tier_reachable().await);

        tier.down.store(true, std::sync::atomic::Ordering::SeqCst);
        cache.set("k", json!(1), Duration::from_secs(60)).await;

        assert!(!cache.is_shared_tier_reachable().await);
        assert_eq!(cache.stats().shared_errors, 1);
        assert_eq!(cache.get("k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_recovers_after_probe_interval() {
        let tier = Arc::new(LocalTier::default());
        tier.down.store(true, std::sync::atomic::Ordering::SeqCst);
        let cache = cache_with(tier.clone(), Duration::from_millis(20));
        assert!(!cache.is_shared_tier_reachable().await);

        tier.down.store(false, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.is_shared_tier_reachable().await);
    }

    #[tokio::test]
    async fn test_clear_matching_hits_both_tiers() {
        let tier = Arc::new(LocalTier::default());
        let cache = cache_with(tier.clone(), Duration::from_secs(60));
        cache.set("bills:a", json!(1), Duration::from_secs(60)).await;
        cache.set("bills:b", json!(2), Duration::from_secs(60)).await;
        cache.set("members:a", json!(3), Duration::from_secs(60)).await;

        assert_eq!(cache.clear_matching("bills:*").await, 2);
        assert!(!tier.contains("bills:a").await);
        assert!(tier.contains("members:a").await);
    }

    #[tokio::test]
    async fn test_no_shared_tier_reports_unreachable() {
        let cache = DualTierCache::memory_only();
        assert!(!cache.is_shared_tier_reachable().await);
        assert_eq!(cache.stats().shared_tier, None);
    }

    #[tokio::test]
    async fn test_shutdown_clears_fast_tier() {
        let cache = DualTierCache::memory_only();
        cache.set("k", json!(1), Duration::from_secs(60)).await;
        cache.shutdown().await;
        assert_eq!(cache.stats().fast_entries, 0);
    }
}
