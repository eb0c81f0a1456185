//! HTTP request handlers for the read API.
//!
//! Handlers never touch the dual-tier cache directly: every read goes
//! through the response cache with a key prefix and a TTL class.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::cache::{CacheStats, KeySpec, TtlClass};
use crate::freshness::FreshnessReport;
use crate::store::{Record, StoreError};
use crate::sync::{list_prefix, record_prefix, STATUS_PREFIX};

/// Default page size for identifier listings.
const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Errors returned to API clients as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidRecordType(_) | StoreError::InvalidIdentifier(_) => {
                ApiError::BadRequest(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => {
                tracing::error!("Request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub record_types: Vec<FreshnessReport>,
    /// Live counters; not part of the cached payload.
    pub cache: CacheStats,
}

/// Freshness of every known record type plus cache statistics.
pub async fn api_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let spec = KeySpec::new(STATUS_PREFIX, &[]);
    let record_types: Vec<FreshnessReport> = state
        .responses
        .cached(&spec, &HashMap::new(), TtlClass::Volatile, || async {
            let now = Utc::now();
            Ok::<_, ApiError>(
                state
                    .known_record_types()
                    .iter()
                    .map(|rt| state.scheduler.report_at(rt, now))
                    .collect(),
            )
        })
        .await?;

    Ok(Json(StatusResponse {
        record_types,
        cache: state.responses.cache().stats(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordListResponse {
    pub record_type: String,
    pub count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
    pub identifiers: Vec<String>,
}

/// Manifest summary for a record type, with a page of identifiers.
pub async fn list_records(
    State(state): State<AppState>,
    Path(record_type): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<RecordListResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let key_params = HashMap::from([
        ("limit".to_string(), limit.to_string()),
        ("offset".to_string(), offset.to_string()),
    ]);
    let spec = KeySpec::new(list_prefix(&record_type), &["limit", "offset"]);

    let response = state
        .responses
        .cached(&spec, &key_params, TtlClass::Standard, || async {
            let manifest = match state.store.load_manifest(&record_type) {
                Some(m) => m,
                None if state.is_configured(&record_type) => Default::default(),
                None => {
                    return Err(ApiError::NotFound(format!(
                        "Unknown record type: {}",
                        record_type
                    )))
                }
            };
            Ok(RecordListResponse {
                record_type: record_type.clone(),
                count: manifest.count,
                last_updated: manifest.last_updated,
                offset,
                limit,
                identifiers: manifest
                    .identifiers
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .collect(),
            })
        })
        .await?;

    Ok(Json(response))
}

/// One persisted record.
pub async fn get_record(
    State(state): State<AppState>,
    Path((record_type, id)): Path<(String, String)>,
) -> Result<Json<Record>, ApiError> {
    let spec = KeySpec::new(record_prefix(&record_type), &["id"]);
    let params = HashMap::from([("id".to_string(), id.clone())]);

    let record = state
        .responses
        .cached(&spec, &params, TtlClass::Reference, || async {
            match state.store.get(&record_type, &id) {
                Ok(Some(record)) => Ok(record),
                Ok(None) => Err(ApiError::NotFound(format!(
                    "{}/{} not found",
                    record_type, id
                ))),
                Err(e) => Err(ApiError::from(e)),
            }
        })
        .await?;

    Ok(Json(record))
}

/// Drop cached responses under a prefix (e.g. `records:bills`).
pub async fn clear_cache(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> impl IntoResponse {
    let cleared = state.responses.invalidate(&prefix).await;
    Json(serde_json::json!({ "prefix": prefix, "cleared": cleared }))
}
