//! Keeps configured collections fresh.
//!
//! For each collection, ask the [`FreshnessScheduler`] whether it is stale,
//! run the matching [`FetchClient`] if so, then record the outcome and drop
//! cached responses that depend on the record type. Sources run concurrently;
//! collections within one source run in order.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::config::Settings;
use crate::fetch::{FetchClient, FetchError, FetchOptions, FetchReport, FetchResult, HttpClient};
use crate::freshness::FreshnessScheduler;
use crate::rate_limit::RateLimiter;
use crate::store::RecordStore;

/// Cache prefix for a record type's list responses.
pub fn list_prefix(record_type: &str) -> String {
    format!("records:{}", record_type)
}

/// Cache prefix for a record type's single-record responses.
pub fn record_prefix(record_type: &str) -> String {
    format!("record:{}", record_type)
}

/// Cache prefix for status responses.
pub const STATUS_PREFIX: &str = "status";

/// What happened to one collection during a sync pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Fresh {
        source: String,
        collection: String,
    },
    Fetched(FetchReport),
    Failed {
        source: String,
        collection: String,
        error: String,
    },
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        match self {
            SyncOutcome::Failed { .. } => true,
            SyncOutcome::Fetched(report) => !report.is_complete(),
            SyncOutcome::Fresh { .. } => false,
        }
    }
}

pub struct Synchronizer {
    clients: BTreeMap<String, FetchClient>,
    scheduler: FreshnessScheduler,
    responses: Option<ResponseCache>,
}

impl Synchronizer {
    pub fn new(clients: BTreeMap<String, FetchClient>, scheduler: FreshnessScheduler) -> Self {
        Self {
            clients,
            scheduler,
            responses: None,
        }
    }

    /// Invalidate cached responses after each fetch.
    pub fn with_response_cache(mut self, responses: ResponseCache) -> Self {
        self.responses = Some(responses);
        self
    }

    /// One fetch client per configured source, sharing `store` and
    /// `rate_limiter`.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<RecordStore>,
        rate_limiter: RateLimiter,
    ) -> FetchResult<Self> {
        let http = HttpClient::new(
            rate_limiter,
            settings.request_timeout,
            settings.user_agent.as_deref(),
            settings.retry,
        )?;

        let mut clients = BTreeMap::new();
        for (name, source) in &settings.sources {
            let client = FetchClient::new(name, source.clone(), http.clone(), store.clone())?
                .with_detail_concurrency(settings.detail_concurrency);
            clients.insert(name.clone(), client);
        }

        let mut scheduler = FreshnessScheduler::new(store, settings.max_age);
        for (record_type, max_age) in settings.max_age_overrides() {
            scheduler.set_max_age(&record_type, max_age);
        }

        Ok(Self::new(clients, scheduler))
    }

    pub fn scheduler(&self) -> &FreshnessScheduler {
        &self.scheduler
    }

    pub fn client(&self, source: &str) -> FetchResult<&FetchClient> {
        self.clients
            .get(source)
            .ok_or_else(|| FetchError::UnknownSource(source.to_string()))
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    /// Fetch one collection now, regardless of freshness, and record the
    /// outcome in fetch metadata.
    pub async fn fetch_now(
        &self,
        source: &str,
        collection: &str,
        options: &FetchOptions,
    ) -> FetchResult<FetchReport> {
        let client = self.client(source)?;
        let report = client.fetch(collection, options).await?;
        self.finish(client, &report).await;
        Ok(report)
    }

    async fn finish(&self, client: &FetchClient, report: &FetchReport) {
        let record_type = report.record_type.as_str();
        let recorded = match &report.aborted {
            None => {
                let count = client.store().list_identifiers(record_type).len();
                self.scheduler.record_success(record_type, count)
            }
            Some(reason) => self.scheduler.record_failure(record_type, reason),
        };
        if let Err(e) = recorded {
            warn!("Failed to write fetch metadata for {}: {}", record_type, e);
        }

        if let Some(responses) = &self.responses {
            if report.persisted > 0 {
                responses.invalidate(&list_prefix(record_type)).await;
                responses.invalidate(&record_prefix(record_type)).await;
            }
            responses.invalidate(STATUS_PREFIX).await;
        }
    }

    async fn sync_source(
        &self,
        name: &str,
        client: &FetchClient,
        force: bool,
    ) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::new();
        for (collection, config) in &client.source().collections {
            if !force && !self.scheduler.needs_fetch(&config.record_type) {
                outcomes.push(SyncOutcome::Fresh {
                    source: name.to_string(),
                    collection: collection.clone(),
                });
                continue;
            }

            let options = FetchOptions {
                max_results: None,
                force: false,
            };
            match self.fetch_now(name, collection, &options).await {
                Ok(report) => outcomes.push(SyncOutcome::Fetched(report)),
                Err(e) => {
                    if let Err(meta_err) =
                        self.scheduler.record_failure(&config.record_type, &e.to_string())
                    {
                        warn!("Failed to write fetch metadata: {}", meta_err);
                    }
                    outcomes.push(SyncOutcome::Failed {
                        source: name.to_string(),
                        collection: collection.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcomes
    }

    /// Fetch every stale collection (or every collection when `force`),
    /// optionally limited to one source.
    ///
    /// `force` here ignores freshness only; already-manifested items are
    /// still skipped.
    pub async fn sync(
        &self,
        only_source: Option<&str>,
        force: bool,
    ) -> FetchResult<Vec<SyncOutcome>> {
        if let Some(source) = only_source {
            self.client(source)?;
        }

        let runs = self
            .clients
            .iter()
            .filter(|(name, _)| only_source.map_or(true, |s| s == name.as_str()))
            .map(|(name, client)| self.sync_source(name, client, force));

        let outcomes: Vec<SyncOutcome> = join_all(runs).await.into_iter().flatten().collect();

        let fetched = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Fetched(_)))
            .count();
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(
            "Sync complete: {} collections checked, {} fetched, {} failed",
            outcomes.len(),
            fetched,
            failed
        );
        Ok(outcomes)
    }
}
