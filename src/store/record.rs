//! Persisted record document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fetched entity: the upstream JSON plus where and when it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Record {
    pub fn new(data: serde_json::Value, source_url: Option<String>) -> Self {
        Self {
            source_url,
            fetched_at: Utc::now(),
            data,
        }
    }
}

/// On-disk envelope. Carries its own type and identifier so a file can be
/// checked against the path it was found at.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub record_type: String,
    pub identifier: String,
    #[serde(flatten)]
    pub record: Record,
}
