//! In-process fast tier with per-entry expiry.
//!
//! Entries expire lazily: an expired entry is a miss and is removed when
//! read. The map is also pruned of expired entries whenever it grows past
//! the sweep threshold.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Default size at which writes prune expired entries.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

/// A cached value with expiration time.
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Fast tier. A single coarse lock; entry volume is modest.
pub struct MemoryTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
    sweep_threshold: usize,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(sweep_threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sweep_threshold: sweep_threshold.max(1),
        }
    }

    /// Get a live value. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = {
            let guard = self.entries.read().ok()?;
            match guard.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            if let Ok(mut guard) = self.entries.write() {
                // Re-check: another writer may have refreshed it meanwhile.
                if guard.get(key).is_some_and(|e| e.is_expired()) {
                    guard.remove(key);
                }
            }
        }
        None
    }

    pub fn set(&self, key: String, value: Value, ttl: Duration) {
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(key, CacheEntry::new(value, ttl));
            // Prune expired entries occasionally (when cache grows large)
            if guard.len() > self.sweep_threshold {
                guard.retain(|_, entry| !entry.is_expired());
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries
            .write()
            .map(|mut guard| guard.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Remove every key matching a prefix-style pattern (`foo:*`), or the
    /// exact key when the pattern has no trailing `*`.
    pub fn clear_matching(&self, pattern: &str) -> usize {
        match self.entries.write() {
            Ok(mut guard) => {
                let before = guard.len();
                guard.retain(|key, _| !pattern_matches(pattern, key));
                before - guard.len()
            }
            Err(_) => 0,
        }
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        match self.entries.write() {
            Ok(mut guard) => {
                let before = guard.len();
                guard.retain(|_, entry| !entry.is_expired());
                before - guard.len()
            }
            Err(_) => 0,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix-style wildcard: `bills:*` matches `bills:congress=118`, `*`
/// matches everything, a pattern without `*` must match exactly.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_then_get() {
        let tier = MemoryTier::new();
        tier.set("a".to_string(), json!({"n": 1}), Duration::from_secs(60));
        assert_eq!(tier.get("a"), Some(json!({"n": 1})));
        assert_eq!(tier.get("b"), None);
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let tier = MemoryTier::new();
        tier.set("a".to_string(), json!(1), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(tier.get("a"), None);
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_zero_ttl_never_served() {
        let tier = MemoryTier::new();
        tier.set("a".to_string(), json!(1), Duration::ZERO);
        assert_eq!(tier.get("a"), None);
    }

    #[test]
    fn test_clear_matching_prefix() {
        let tier = MemoryTier::new();
        let ttl = Duration::from_secs(60);
        tier.set("bills:congress=118".to_string(), json!(1), ttl);
        tier.set("bills:congress=117".to_string(), json!(2), ttl);
        tier.set("members:state=CA".to_string(), json!(3), ttl);

        assert_eq!(tier.clear_matching("bills:*"), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.get("members:state=CA").is_some());
    }

    #[test]
    fn test_write_past_threshold_prunes_expired() {
        let tier = MemoryTier::with_sweep_threshold(2);
        tier.set("old1".to_string(), json!(1), Duration::ZERO);
        tier.set("old2".to_string(), json!(2), Duration::ZERO);
        tier.set("new".to_string(), json!(3), Duration::from_secs(60));

        assert_eq!(tier.len(), 1);
        assert!(tier.get("new").is_some());
    }

    #[test]
    fn test_sweep_expired() {
        let tier = MemoryTier::new();
        tier.set("a".to_string(), json!(1), Duration::ZERO);
        tier.set("b".to_string(), json!(2), Duration::from_secs(60));
        assert_eq!(tier.sweep_expired(), 1);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("bills:*", "bills:"));
        assert!(!pattern_matches("bills:*", "members:x"));
        assert!(pattern_matches("exact", "exact"));
        assert!(!pattern_matches("exact", "exactly"));
    }
}
