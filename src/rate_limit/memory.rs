//! In-memory rate limit backend for single-process operation.
//!
//! Each source gets its own window behind its own lock, so callers for
//! different sources never contend. State is not persisted across restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::backend::{RateLimitBackend, RateLimitResult, RateWindow};
use super::config::{RateLimitConfig, SourceStats};

/// In-memory rate limit backend.
#[derive(Clone, Default)]
pub struct InMemoryRateLimitBackend {
    sources: Arc<RwLock<HashMap<String, Arc<Mutex<RateWindow>>>>>,
}

impl InMemoryRateLimitBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the window for a source, creating it on first use.
    async fn window(&self, source: &str, config: &RateLimitConfig) -> Arc<Mutex<RateWindow>> {
        {
            let sources = self.sources.read().await;
            if let Some(window) = sources.get(source) {
                return window.clone();
            }
        }

        let mut sources = self.sources.write().await;
        sources
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(config))))
            .clone()
    }

    /// Get statistics for all tracked sources.
    pub async fn get_all_stats(&self) -> HashMap<String, SourceStats> {
        let windows: Vec<(String, Arc<Mutex<RateWindow>>)> = {
            let sources = self.sources.read().await;
            sources
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let now = Instant::now();
        let mut stats = HashMap::with_capacity(windows.len());
        for (source, window) in windows {
            stats.insert(source, window.lock().await.stats(now));
        }
        stats
    }
}

#[async_trait]
impl RateLimitBackend for InMemoryRateLimitBackend {
    async fn try_acquire(
        &self,
        source: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult<Duration> {
        let window = self.window(source, config).await;
        let mut window = window.lock().await;
        window.reconfigure(config);
        Ok(window.try_acquire(Instant::now()))
    }

    async fn stats(&self, source: &str) -> RateLimitResult<Option<SourceStats>> {
        let window = {
            let sources = self.sources.read().await;
            sources.get(source).cloned()
        };
        match window {
            Some(window) => Ok(Some(window.lock().await.stats(Instant::now()))),
            None => Ok(None),
        }
    }
}
