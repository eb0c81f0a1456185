//! Decides when a record type is stale enough to re-fetch.
//!
//! Reads and writes only fetch metadata (and the manifest, to spot a
//! success claim with no data behind it). How to fetch is someone else's
//! problem.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{FetchMetadata, FetchStatus, RecordStore, StoreResult};

/// Default freshness threshold.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Why a record type does or does not need fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    /// Never fetched successfully, or metadata is missing/corrupt.
    NeverFetched,
    /// Older than the threshold.
    Expired,
    /// Metadata claims success but the manifest is empty.
    Inconsistent,
    Fresh,
}

impl Staleness {
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

/// Freshness summary for status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessReport {
    pub record_type: String,
    pub staleness: Staleness,
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_status: Option<FetchStatus>,
    pub record_count: usize,
    pub max_age_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FreshnessScheduler {
    store: Arc<RecordStore>,
    default_max_age: Duration,
    max_age: HashMap<String, Duration>,
}

impl FreshnessScheduler {
    pub fn new(store: Arc<RecordStore>, default_max_age: Duration) -> Self {
        Self {
            store,
            default_max_age,
            max_age: HashMap::new(),
        }
    }

    /// Per-type threshold override.
    pub fn set_max_age(&mut self, record_type: &str, max_age: Duration) {
        self.max_age.insert(record_type.to_string(), max_age);
    }

    pub fn max_age(&self, record_type: &str) -> Duration {
        self.max_age
            .get(record_type)
            .copied()
            .unwrap_or(self.default_max_age)
    }

    pub fn needs_fetch(&self, record_type: &str) -> bool {
        self.needs_fetch_at(record_type, Utc::now())
    }

    pub fn needs_fetch_at(&self, record_type: &str, now: DateTime<Utc>) -> bool {
        let staleness = self.staleness_at(record_type, now);
        debug!("{} freshness: {:?}", record_type, staleness);
        staleness.needs_fetch()
    }

    pub fn staleness_at(&self, record_type: &str, now: DateTime<Utc>) -> Staleness {
        let Some(metadata) = self.store.read_metadata(record_type) else {
            return Staleness::NeverFetched;
        };
        let Some(last_fetch) = metadata.last_fetch else {
            return Staleness::NeverFetched;
        };

        if metadata.status == FetchStatus::Success
            && self
                .store
                .load_manifest(record_type)
                .map_or(true, |m| m.is_empty())
        {
            return Staleness::Inconsistent;
        }

        // A clock step backwards reads as age zero.
        let age = (now - last_fetch).to_std().unwrap_or(Duration::ZERO);
        if age > self.max_age(record_type) {
            Staleness::Expired
        } else {
            Staleness::Fresh
        }
    }

    pub fn report_at(&self, record_type: &str, now: DateTime<Utc>) -> FreshnessReport {
        let metadata = self.store.read_metadata(record_type);
        FreshnessReport {
            record_type: record_type.to_string(),
            staleness: self.staleness_at(record_type, now),
            last_fetch: metadata.as_ref().and_then(|m| m.last_fetch),
            last_status: metadata.as_ref().map(|m| m.status),
            record_count: metadata.as_ref().map(|m| m.record_count).unwrap_or(0),
            max_age_secs: self.max_age(record_type).as_secs(),
            error: metadata.and_then(|m| m.error),
        }
    }

    /// Stamp a completed fetch.
    pub fn record_success(&self, record_type: &str, record_count: usize) -> StoreResult<()> {
        let metadata = FetchMetadata::success(Utc::now(), record_count);
        self.store.write_metadata(record_type, &metadata)?;
        info!("{}: fetch recorded ({} records)", record_type, record_count);
        Ok(())
    }

    /// Stamp a failed fetch, keeping the last successful fetch time.
    pub fn record_failure(&self, record_type: &str, error: &str) -> StoreResult<()> {
        let previous = self.store.read_metadata(record_type);
        let metadata = FetchMetadata::failure(previous.as_ref(), Utc::now(), error.to_string());
        self.store.write_metadata(record_type, &metadata)?;
        warn!("{}: fetch failed: {}", record_type, error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn scheduler(dir: &std::path::Path) -> (Arc<RecordStore>, FreshnessScheduler) {
        let store = Arc::new(RecordStore::new(dir));
        let scheduler = FreshnessScheduler::new(store.clone(), DEFAULT_MAX_AGE);
        (store, scheduler)
    }

    fn fetched_at(store: &RecordStore, record_type: &str, at: DateTime<Utc>) {
        store
            .append_manifest(record_type, vec!["118-HR-1".to_string()], at)
            .unwrap();
        store
            .write_metadata(record_type, &FetchMetadata::success(at, 1))
            .unwrap();
    }

    #[test]
    fn test_no_metadata_needs_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (_, scheduler) = scheduler(dir.path());
        assert!(scheduler.needs_fetch("bills"));
        assert_eq!(
            scheduler.staleness_at("bills", Utc::now()),
            Staleness::NeverFetched
        );
    }

    #[test]
    fn test_older_than_max_age_needs_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (store, scheduler) = scheduler(dir.path());
        let now = Utc::now();
        fetched_at(&store, "bills", now - ChronoDuration::hours(25));

        assert!(scheduler.needs_fetch_at("bills", now));
    }

    #[test]
    fn test_recent_fetch_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let (store, scheduler) = scheduler(dir.path());
        let now = Utc::now();
        fetched_at(&store, "bills", now - ChronoDuration::hours(1));

        assert!(!scheduler.needs_fetch_at("bills", now));
    }

    #[test]
    fn test_success_with_empty_manifest_needs_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (store, scheduler) = scheduler(dir.path());
        store
            .write_metadata("bills", &FetchMetadata::success(Utc::now(), 10))
            .unwrap();

        assert_eq!(
            scheduler.staleness_at("bills", Utc::now()),
            Staleness::Inconsistent
        );
    }

    #[test]
    fn test_corrupt_metadata_needs_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (store, scheduler) = scheduler(dir.path());
        fetched_at(&store, "bills", Utc::now());
        std::fs::write(dir.path().join("bills").join("fetch_metadata.json"), b"{oops").unwrap();

        assert!(scheduler.needs_fetch("bills"));
    }

    #[test]
    fn test_per_type_override() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut scheduler) = scheduler(dir.path());
        scheduler.set_max_age("filings", Duration::from_secs(3600));
        let now = Utc::now();
        fetched_at(&store, "filings", now - ChronoDuration::hours(2));
        fetched_at(&store, "bills", now - ChronoDuration::hours(2));

        assert!(scheduler.needs_fetch_at("filings", now));
        assert!(!scheduler.needs_fetch_at("bills", now));
    }

    #[test]
    fn test_failure_keeps_last_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (store, scheduler) = scheduler(dir.path());
        let now = Utc::now();
        fetched_at(&store, "bills", now - ChronoDuration::hours(1));

        scheduler.record_failure("bills", "HTTP 503").unwrap();

        let report = scheduler.report_at("bills", now);
        assert_eq!(report.last_status, Some(FetchStatus::Failure));
        assert_eq!(report.error.as_deref(), Some("HTTP 503"));
        assert_eq!(report.staleness, Staleness::Fresh);
    }

    #[test]
    fn test_record_success_then_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let (store, scheduler) = scheduler(dir.path());
        store
            .append_manifest("members", vec!["A000001".to_string()], Utc::now())
            .unwrap();

        scheduler.record_success("members", 1).unwrap();
        assert!(!scheduler.needs_fetch("members"));
    }
}
