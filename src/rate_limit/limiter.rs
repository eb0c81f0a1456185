//! Per-source sliding-window rate limiter.
//!
//! Provides a blocking `acquire(source)` over a pluggable backend.
//! Supports in-memory and Redis backends.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, warn};

pub use super::config::{RateLimitConfig, SourceStats};

use super::backend::{RateLimitBackend, RateLimitResult};
use super::memory::InMemoryRateLimitBackend;

/// Type alias for a boxed rate limit backend.
pub type BoxedRateLimitBackend = Arc<dyn RateLimitBackend>;

/// Rate limiter that bounds outbound requests per named upstream source.
///
/// Constructed once at start-up and cloned into every fetch client; clones
/// share the same backend and source table.
#[derive(Clone)]
pub struct RateLimiter {
    backend: BoxedRateLimitBackend,
    sources: Arc<RwLock<HashMap<String, RateLimitConfig>>>,
    default_config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new rate limiter with the given backend.
    pub fn new(backend: BoxedRateLimitBackend) -> Self {
        Self::with_default(backend, RateLimitConfig::default())
    }

    /// Create a limiter backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateLimitBackend::new()))
    }

    /// Create a new rate limiter whose unregistered sources use `default_config`.
    pub fn with_default(backend: BoxedRateLimitBackend, default_config: RateLimitConfig) -> Self {
        Self {
            backend,
            sources: Arc::new(RwLock::new(HashMap::new())),
            default_config,
        }
    }

    /// Register the request budget for a source.
    pub fn register(&self, source: &str, config: RateLimitConfig) -> RateLimitResult<()> {
        config.validate()?;
        if let Ok(mut sources) = self.sources.write() {
            sources.insert(source.to_string(), config);
        }
        Ok(())
    }

    /// The budget that applies to `source`.
    pub fn config_for(&self, source: &str) -> RateLimitConfig {
        self.sources
            .read()
            .ok()
            .and_then(|sources| sources.get(source).copied())
            .unwrap_or(self.default_config)
    }

    /// Wait until one more request to `source` fits in its window, then
    /// record it. Returns the total time spent waiting.
    ///
    /// Never fails: a backend error is logged and the request is allowed.
    pub async fn acquire(&self, source: &str) -> Duration {
        let mut waited = Duration::ZERO;

        loop {
            let config = self.config_for(source);
            match self.backend.try_acquire(source, &config).await {
                Ok(wait) if wait.is_zero() => return waited,
                Ok(wait) => {
                    debug!("Rate limiting {}: waiting {:?}", source, wait);
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
                Err(e) => {
                    warn!("Rate limit acquire failed for {}: {}", source, e);
                    // Fall back to allowing the request
                    return waited;
                }
            }
        }
    }

    /// Get statistics for a source, if the backend has seen it.
    pub async fn stats(&self, source: &str) -> Option<SourceStats> {
        match self.backend.stats(source).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Failed to read rate limit stats for {}: {}", source, e);
                None
            }
        }
    }

    /// Names of all registered sources.
    pub fn sources(&self) -> Vec<String> {
        self.sources
            .read()
            .map(|sources| sources.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the underlying backend for direct access.
    pub fn backend(&self) -> &BoxedRateLimitBackend {
        &self.backend
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}
