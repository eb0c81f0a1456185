//! Last-fetch bookkeeping per record type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the most recent fetch batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failure,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Failure => "failure",
        }
    }
}

/// Read only by the freshness scheduler; written once per completed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchMetadata {
    /// Last successful fetch. Preserved across failures.
    #[serde(default)]
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_attempt: DateTime<Utc>,
    #[serde(default)]
    pub record_count: usize,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchMetadata {
    pub fn success(at: DateTime<Utc>, record_count: usize) -> Self {
        Self {
            last_fetch: Some(at),
            last_attempt: at,
            record_count,
            status: FetchStatus::Success,
            error: None,
        }
    }

    /// A failed attempt that keeps what the previous metadata knew.
    pub fn failure(previous: Option<&FetchMetadata>, at: DateTime<Utc>, error: String) -> Self {
        Self {
            last_fetch: previous.and_then(|m| m.last_fetch),
            last_attempt: at,
            record_count: previous.map(|m| m.record_count).unwrap_or(0),
            status: FetchStatus::Failure,
            error: Some(error),
        }
    }
}
