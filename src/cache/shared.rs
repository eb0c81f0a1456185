//! Optional shared (cross-process) cache tier.

use std::time::Duration;

use async_trait::async_trait;

/// Result type for shared tier operations.
pub type CacheTierResult<T> = Result<T, CacheTierError>;

/// Errors from a shared cache tier. These never reach callers of
/// [`DualTierCache`](super::DualTierCache); they are logged and the fast tier
/// carries on alone.
#[derive(Debug, thiserror::Error)]
pub enum CacheTierError {
    #[error("Shared cache unavailable: {0}")]
    Unavailable(String),
    #[error("Shared cache error: {0}")]
    Backend(String),
}

/// A value read from the shared tier, with its remaining lifetime if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedEntry {
    pub value: String,
    pub ttl: Option<Duration>,
}

/// Network-accessible cache shared across processes. Expiry is the tier's
/// own business; values are JSON text.
#[async_trait]
pub trait SharedCacheTier: Send + Sync {
    /// Cheap liveness check used by the reachability probe.
    async fn ping(&self) -> CacheTierResult<()>;

    async fn get(&self, key: &str) -> CacheTierResult<Option<SharedEntry>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheTierResult<()>;

    async fn delete(&self, key: &str) -> CacheTierResult<()>;

    /// Remove keys matching a prefix-style pattern. Returns how many.
    async fn delete_matching(&self, pattern: &str) -> CacheTierResult<usize>;

    /// Short label for logs and status output.
    fn name(&self) -> &str;
}
