//! Response caching for read-only operations.
//!
//! A [`KeySpec`] names a logical prefix and the request parameters that
//! matter. [`ResponseCache::cached`] builds the key, serves hits from the
//! [`DualTierCache`], and on a miss runs the wrapped operation and stores its
//! result with a TTL picked by [`TtlClass`]. Errors from the wrapped
//! operation are returned as-is and never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::DualTierCache;

/// How often the underlying data changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlClass {
    /// Rarely-changing reference data (a single persisted record).
    Reference,
    /// Ordinary collection summaries.
    Standard,
    /// Status and other frequently-updated data.
    Volatile,
}

/// TTL per volatility class, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub reference: u64,
    pub standard: u64,
    pub volatile: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            reference: 24 * 60 * 60,
            standard: 60 * 60,
            volatile: 5 * 60,
        }
    }
}

impl TtlPolicy {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        let secs = match class {
            TtlClass::Reference => self.reference,
            TtlClass::Standard => self.standard,
            TtlClass::Volatile => self.volatile,
        };
        Duration::from_secs(secs)
    }
}

/// Build a deterministic cache key: parameters sorted by name, absent values
/// omitted, values URL-encoded.
///
/// `build_key("committees", [("congress", Some("118")), ("chamber", Some("house"))])`
/// yields `committees:chamber=house&congress=118`. With no parameters the key
/// is `prefix:_`.
pub fn build_key<I, K, V>(prefix: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, Option<V>)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.as_ref().to_string(), v.as_ref().to_string())))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        return format!("{}:_", prefix);
    }

    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}:{}", prefix, query)
}

/// A logical prefix plus the parameter names that distinguish responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub prefix: String,
    pub fields: Vec<String>,
}

impl KeySpec {
    pub fn new(prefix: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            prefix: prefix.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Key for a request; parameters not named in `fields` are ignored.
    pub fn key(&self, params: &HashMap<String, String>) -> String {
        build_key(
            &self.prefix,
            self.fields
                .iter()
                .map(|f| (f.as_str(), params.get(f).map(String::as_str))),
        )
    }
}

/// Wraps idempotent read operations with the dual-tier cache.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    cache: Arc<DualTierCache>,
    policy: TtlPolicy,
}

impl ResponseCache {
    pub fn new(cache: Arc<DualTierCache>, policy: TtlPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn cache(&self) -> &Arc<DualTierCache> {
        &self.cache
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Serve `key` from cache, or run `op` and cache its successful result.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        class: TtlClass,
        op: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.cache.get(key).await {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => {
                    debug!("Response cache hit: {}", key);
                    return Ok(value);
                }
                Err(e) => warn!("Discarding cached value for {}: {}", key, e),
            }
        }

        let value = op().await?;
        match serde_json::to_value(&value) {
            Ok(encoded) => self.cache.set(key, encoded, self.policy.ttl(class)).await,
            Err(e) => warn!("Not caching {}: {}", key, e),
        }
        Ok(value)
    }

    /// Build the key from `spec` and `params`, then [`get_or_compute`](Self::get_or_compute).
    pub async fn cached<T, E, F, Fut>(
        &self,
        spec: &KeySpec,
        params: &HashMap<String, String>,
        class: TtlClass,
        op: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = spec.key(params);
        self.get_or_compute(&key, class, op).await
    }

    /// Drop every cached response under `prefix`.
    pub async fn invalidate(&self, prefix: &str) -> usize {
        self.cache.clear_matching(&format!("{}:*", prefix)).await
    }
}
