//! Read API over the record store.
//!
//! Every response is served through the [`ResponseCache`]; the fast tier is
//! swept on a timer and cleared on shutdown.

mod handlers;
mod routes;

pub use handlers::{ApiError, RecordListResponse, StatusResponse};
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{DualTierCache, ResponseCache};
use crate::config::Settings;
use crate::freshness::FreshnessScheduler;
use crate::store::RecordStore;

/// How often the server reclaims expired fast-tier entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RecordStore>,
    pub responses: ResponseCache,
    pub scheduler: Arc<FreshnessScheduler>,
    /// Record types the configured sources produce.
    pub record_types: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(settings: &Settings, cache: Arc<DualTierCache>) -> Self {
        let store = Arc::new(RecordStore::new(&settings.data_dir));
        let mut scheduler = FreshnessScheduler::new(store.clone(), settings.max_age);
        for (record_type, max_age) in settings.max_age_overrides() {
            scheduler.set_max_age(&record_type, max_age);
        }

        Self {
            store,
            responses: ResponseCache::new(cache, settings.ttl),
            scheduler: Arc::new(scheduler),
            record_types: Arc::new(settings.record_types()),
        }
    }

    pub fn is_configured(&self, record_type: &str) -> bool {
        self.record_types.iter().any(|rt| rt == record_type)
    }

    /// Configured record types plus any found on disk.
    pub fn known_record_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.record_types.as_ref().clone();
        types.extend(self.store.record_types());
        types.sort();
        types.dedup();
        types
    }
}

/// Start the web server; returns after Ctrl-C once in-flight requests finish.
pub async fn serve(
    settings: &Settings,
    cache: Arc<DualTierCache>,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let state = AppState::new(settings, cache.clone());
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let sweeper = {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let swept = cache.sweep_expired();
                if swept > 0 {
                    tracing::debug!("Swept {} expired cache entries", swept);
                }
            }
        })
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    cache.shutdown().await;
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
