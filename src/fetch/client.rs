//! Paginated collection fetching with manifest-based dedup.
//!
//! One invocation walks a collection page by page:
//!
//! 1. acquire the source's rate budget and request the page (retried with
//!    backoff on transient failure),
//! 2. skip items whose identifier is already in the manifest,
//! 3. persist the rest (fetching a detail document first when the
//!    collection has one),
//! 4. append the page's persisted identifiers to the manifest in one batch,
//! 5. continue while the upstream has more and `max_results` is not reached.
//!
//! Exhausted retries abort the remaining pages but keep what was persisted,
//! so re-running resumes where the last run stopped.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::extract::{extract_path, render_template, resolve_url};
use super::http::HttpClient;
use super::source::{CollectionConfig, SourceConfig};
use super::{FetchError, FetchResult};
use crate::store::{Record, RecordStore};

/// Default number of detail requests in flight per page.
pub const DEFAULT_DETAIL_CONCURRENCY: usize = 4;

/// Caller-controlled knobs for one invocation.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Stop after examining this many items.
    pub max_results: Option<usize>,
    /// Re-fetch and overwrite items that are already manifested.
    pub force: bool,
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub source: String,
    pub collection: String,
    pub record_type: String,
    pub pages: usize,
    /// Items examined, including skipped and failed ones.
    pub seen: usize,
    pub persisted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Identifiers new to the manifest.
    pub manifest_added: usize,
    /// Why pagination stopped early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

/// Fetches the collections of one upstream source into a [`RecordStore`].
#[derive(Debug, Clone)]
pub struct FetchClient {
    name: String,
    source: SourceConfig,
    http: HttpClient,
    store: Arc<RecordStore>,
    detail_concurrency: usize,
}

/// An item that passed dedup and is waiting to be persisted.
struct Pending {
    id: String,
    item: Value,
}

impl FetchClient {
    /// Registers the source's rate limit with the client's limiter.
    pub fn new(
        name: &str,
        source: SourceConfig,
        http: HttpClient,
        store: Arc<RecordStore>,
    ) -> FetchResult<Self> {
        http.rate_limiter()
            .register(name, source.rate_limit)
            .map_err(|e| FetchError::InvalidSource(format!("{}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            source,
            http,
            store,
            detail_concurrency: DEFAULT_DETAIL_CONCURRENCY,
        })
    }

    pub fn with_detail_concurrency(mut self, n: usize) -> Self {
        self.detail_concurrency = n.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    fn collection(&self, name: &str) -> FetchResult<&CollectionConfig> {
        self.source
            .collection(name)
            .ok_or_else(|| FetchError::UnknownCollection {
                source_name: self.name.clone(),
                collection: name.to_string(),
            })
    }

    fn base_query(&self, collection: &CollectionConfig) -> BTreeMap<String, String> {
        let mut query = self.source.query.clone();
        query.extend(collection.query.clone());
        query
    }

    /// Fetch one collection.
    ///
    /// Only an unknown collection is an error. Upstream failures end the run
    /// early and are reported in [`FetchReport::aborted`].
    pub async fn fetch(
        &self,
        collection_name: &str,
        options: &FetchOptions,
    ) -> FetchResult<FetchReport> {
        let collection = self.collection(collection_name)?;
        let record_type = collection.record_type.as_str();
        let page_size = collection.page_size.unwrap_or(self.source.page_size).max(1);
        let list_url = resolve_url(&self.source.base_url, &collection.path);
        let base_query = self.base_query(collection);

        let known = if options.force {
            HashSet::new()
        } else {
            self.store.list_identifiers(record_type)
        };
        let mut seen_this_run: HashSet<String> = HashSet::new();

        let mut report = FetchReport {
            source: self.name.clone(),
            collection: collection_name.to_string(),
            record_type: record_type.to_string(),
            started_at: Some(Utc::now()),
            ..FetchReport::default()
        };

        info!(
            "[{}] Fetching {} ({} already manifested{})",
            self.name,
            collection_name,
            known.len(),
            if options.force { ", forced" } else { "" }
        );

        if options.max_results == Some(0) {
            debug!(
                "[{}] max_results is 0, nothing to fetch for {}",
                self.name, collection_name
            );
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        let mut index = 0usize;
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(String, String)> = base_query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            query.extend(
                self.source
                    .pagination
                    .page_query(index, page_size, cursor.as_deref()),
            );

            let results_path = collection.results_path.as_str();
            let page = self
                .http
                .get_with(&self.name, &list_url, &query, |body| {
                    if extract_path(&body, results_path).is_array() {
                        Ok(body)
                    } else {
                        Err(FetchError::Decode {
                            url: list_url.clone(),
                            reason: format!("no array at '{}'", results_path),
                        })
                    }
                })
                .await;

            let body = match page {
                Ok(body) => body,
                Err(e) => {
                    error!(
                        "[{}] {} page {} failed, stopping: {}",
                        self.name,
                        collection_name,
                        index + 1,
                        e
                    );
                    report.aborted = Some(e.to_string());
                    break;
                }
            };
            report.pages += 1;

            let items = extract_path(&body, results_path)
                .as_array()
                .cloned()
                .unwrap_or_default();
            let received = items.len();
            let (more, next_cursor) = self
                .source
                .pagination
                .next_page(&body, received, page_size);

            let remaining = options
                .max_results
                .map(|max| max.saturating_sub(report.seen))
                .unwrap_or(usize::MAX);
            let truncated = received > remaining;

            let mut pending = Vec::new();
            for item in items.into_iter().take(remaining) {
                report.seen += 1;
                let Some(id) = collection.id.extract(&item) else {
                    warn!(
                        "[{}] {} item without identifier ({}), skipping",
                        self.name,
                        collection_name,
                        collection.id.as_str()
                    );
                    report.failed += 1;
                    continue;
                };
                if known.contains(&id) || !seen_this_run.insert(id.clone()) {
                    report.skipped += 1;
                    continue;
                }
                pending.push(Pending { id, item });
            }

            let (page_ids, detail_abort) =
                self.persist_page(collection, pending, &mut report).await;

            // Manifest only ever lists what was actually written.
            if !page_ids.is_empty() {
                match self.store.append_manifest(record_type, page_ids, Utc::now()) {
                    Ok(added) => report.manifest_added += added,
                    Err(e) => {
                        error!(
                            "[{}] Manifest update for {} failed: {}",
                            self.name, record_type, e
                        );
                        report.aborted = Some(format!("manifest update failed: {}", e));
                        break;
                    }
                }
            }

            debug!(
                "[{}] {} page {}: {} items, {} persisted so far, {} skipped",
                self.name,
                collection_name,
                index + 1,
                received,
                report.persisted,
                report.skipped
            );

            if let Some(reason) = detail_abort {
                report.aborted = Some(reason);
                break;
            }
            if truncated || report.seen >= options.max_results.unwrap_or(usize::MAX) {
                debug!("[{}] Reached max_results for {}", self.name, collection_name);
                break;
            }
            if !more {
                break;
            }

            index += 1;
            cursor = next_cursor;
        }

        report.finished_at = Some(Utc::now());
        if report.is_complete() {
            info!(
                "[{}] {} complete: {} pages, {} new, {} skipped, {} failed",
                self.name,
                collection_name,
                report.pages,
                report.persisted,
                report.skipped,
                report.failed
            );
        }
        Ok(report)
    }

    /// Persist the page's new items. Returns the identifiers written and,
    /// if detail fetching hit an upstream outage, the reason to stop.
    async fn persist_page(
        &self,
        collection: &CollectionConfig,
        pending: Vec<Pending>,
        report: &mut FetchReport,
    ) -> (Vec<String>, Option<String>) {
        let mut written = Vec::with_capacity(pending.len());
        let mut abort = None;

        let documents: Vec<(String, FetchResult<(Value, Option<String>)>)> =
            match &collection.detail_path {
                None => pending
                    .into_iter()
                    .map(|p| (p.id, Ok((p.item, None))))
                    .collect(),
                Some(template) => {
                    stream::iter(pending)
                        .map(|p| async move {
                            let doc = self.fetch_detail(collection, template, &p.item).await;
                            (p.id, doc)
                        })
                        .buffer_unordered(self.detail_concurrency)
                        .collect()
                        .await
                }
            };

        for (id, doc) in documents {
            let (data, source_url) = match doc {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("[{}] Detail for {} failed: {}", self.name, id, e);
                    report.failed += 1;
                    if matches!(e, FetchError::RetriesExhausted { .. }) && abort.is_none() {
                        abort = Some(e.to_string());
                    }
                    continue;
                }
            };

            match self
                .store
                .put(&collection.record_type, &id, &Record::new(data, source_url))
            {
                Ok(_) => {
                    report.persisted += 1;
                    written.push(id);
                }
                Err(e) => {
                    warn!(
                        "[{}] Failed to store {}/{}: {}",
                        self.name, collection.record_type, id, e
                    );
                    report.failed += 1;
                }
            }
        }

        (written, abort)
    }

    async fn fetch_detail(
        &self,
        collection: &CollectionConfig,
        template: &str,
        item: &Value,
    ) -> FetchResult<(Value, Option<String>)> {
        let path = render_template(template, item).ok_or_else(|| FetchError::Decode {
            url: template.to_string(),
            reason: "item lacks fields for detail path".to_string(),
        })?;
        let url = resolve_url(&self.source.base_url, &path);
        let query: Vec<(String, String)> = self.source.query.clone().into_iter().collect();

        let body = self.http.get_json(&self.name, &url, &query).await?;
        let data = match &collection.detail_results_path {
            Some(p) => extract_path(&body, p).clone(),
            None => body,
        };
        if data.is_null() {
            return Err(FetchError::Decode {
                url,
                reason: "empty detail document".to_string(),
            });
        }
        Ok((data, Some(url)))
    }
}
