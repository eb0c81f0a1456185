//! Interrupted fetches resume from the manifest; repeated fetches are no-ops.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use legiscache::fetch::{
    CollectionConfig, FetchClient, FetchOptions, HttpClient, Pagination, RetryPolicy, SourceConfig,
};
use legiscache::rate_limit::{RateLimitConfig, RateLimiter};
use legiscache::store::RecordStore;

const TOTAL: usize = 250;
const PAGE_SIZE: u32 = 200;

#[derive(Clone, Default)]
struct Upstream {
    /// Fail the second page while set.
    outage: Arc<AtomicBool>,
    list_hits: Arc<AtomicUsize>,
    detail_hits: Arc<AtomicUsize>,
}

async fn list(
    State(up): State<Upstream>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    up.list_hits.fetch_add(1, Ordering::SeqCst);
    let offset: usize = q.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: usize = q.get("limit").and_then(|v| v.parse().ok()).unwrap_or(20);
    if offset > 0 && up.outage.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let bills: Vec<_> = (offset..(offset + limit).min(TOTAL))
        .map(|n| json!({"congress": 118, "type": "HR", "number": n.to_string()}))
        .collect();
    Json(json!({ "bills": bills })).into_response()
}

async fn detail(
    State(up): State<Upstream>,
    Path((congress, kind, number)): Path<(u32, String, String)>,
) -> Json<serde_json::Value> {
    up.detail_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "bill": {
            "congress": congress,
            "type": kind,
            "number": number,
            "title": format!("A bill numbered {}", number),
        }
    }))
}

async fn spawn_upstream(up: Upstream) -> String {
    let router = Router::new()
        .route("/bill", get(list))
        .route("/bill/:congress/:kind/:number", get(detail))
        .with_state(up);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn bills_client(base_url: String, store: Arc<RecordStore>) -> FetchClient {
    let mut collection = CollectionConfig::new("bills", "/bill", "bills", "{congress}-{type}-{number}");
    collection.detail_path = Some("/bill/{congress}/{type}/{number}".to_string());
    collection.detail_results_path = Some("bill".to_string());

    let source = SourceConfig {
        base_url,
        rate_limit: RateLimitConfig::per_second(10_000).unwrap(),
        pagination: Pagination::default(),
        page_size: PAGE_SIZE,
        query: BTreeMap::new(),
        collections: BTreeMap::from([("bills".to_string(), collection)]),
    };
    let http = HttpClient::new(
        RateLimiter::in_memory(),
        Duration::from_secs(5),
        None,
        RetryPolicy {
            max_retries: 0,
            base_delay_ms: 1,
        },
    )
    .unwrap();
    FetchClient::new("congress", source, http, store).unwrap()
}

#[tokio::test]
async fn resumes_after_outage_without_refetching_details() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(dir.path()));
    let upstream = Upstream::default();
    upstream.outage.store(true, Ordering::SeqCst);
    let client = bills_client(spawn_upstream(upstream.clone()).await, store.clone());

    let first = client
        .fetch("bills", &FetchOptions::default())
        .await
        .unwrap();
    assert!(!first.is_complete());
    assert_eq!(first.persisted, 200);
    assert_eq!(store.list_identifiers("bills").len(), 200);
    assert_eq!(upstream.detail_hits.load(Ordering::SeqCst), 200);

    // Partial progress is valid on its own.
    let manifest = store.load_manifest("bills").unwrap();
    for id in &manifest.identifiers {
        assert!(store.get("bills", id).unwrap().is_some());
    }

    upstream.outage.store(false, Ordering::SeqCst);
    let second = client
        .fetch("bills", &FetchOptions::default())
        .await
        .unwrap();

    assert!(second.is_complete());
    assert_eq!(second.skipped, 200);
    assert_eq!(second.persisted, 50);
    assert_eq!(upstream.detail_hits.load(Ordering::SeqCst), 250);
    assert_eq!(store.list_identifiers("bills").len(), TOTAL);

    let record = store.get("bills", "118-HR-249").unwrap().unwrap();
    assert_eq!(record.data["title"], "A bill numbered 249");
    assert!(record
        .source_url
        .as_deref()
        .unwrap()
        .ends_with("/bill/118/HR/249"));
}

#[tokio::test]
async fn second_identical_fetch_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(dir.path()));
    let upstream = Upstream::default();
    let client = bills_client(spawn_upstream(upstream.clone()).await, store.clone());

    let first = client
        .fetch("bills", &FetchOptions::default())
        .await
        .unwrap();
    assert!(first.is_complete());
    assert_eq!(first.persisted, TOTAL);
    let manifest_before = store.load_manifest("bills").unwrap();

    let second = client
        .fetch("bills", &FetchOptions::default())
        .await
        .unwrap();

    assert!(second.is_complete());
    assert_eq!(second.persisted, 0);
    assert_eq!(second.skipped, TOTAL);
    assert_eq!(second.manifest_added, 0);
    assert_eq!(upstream.detail_hits.load(Ordering::SeqCst), TOTAL);

    let manifest_after = store.load_manifest("bills").unwrap();
    assert_eq!(manifest_after.identifiers, manifest_before.identifiers);
    assert_eq!(manifest_after.count, TOTAL);
}

#[tokio::test]
async fn rebuilt_manifest_matches_records_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordStore::new(dir.path()));
    let upstream = Upstream::default();
    let client = bills_client(spawn_upstream(upstream).await, store.clone());

    client
        .fetch(
            "bills",
            &FetchOptions {
                max_results: Some(30),
                force: false,
            },
        )
        .await
        .unwrap();

    // Lose the manifest entirely.
    std::fs::remove_file(dir.path().join("bills").join("manifest.json")).unwrap();
    assert!(store.list_identifiers("bills").is_empty());

    let rebuilt = store.rebuild_manifest("bills").unwrap();
    assert_eq!(rebuilt.count, 30);
    assert!(rebuilt.contains("118-HR-0"));
}
