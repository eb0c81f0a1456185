//! Paginated, rate-limited fetching from upstream legislative data APIs.

mod client;
mod extract;
mod http;
mod source;

pub use client::{FetchClient, FetchOptions, FetchReport, DEFAULT_DETAIL_CONCURRENCY};
pub use extract::{extract_path, render_template, resolve_url};
pub use http::{HttpClient, RetryPolicy, USER_AGENT};
pub use source::{default_sources, CollectionConfig, IdSpec, Pagination, SourceConfig};

use crate::store::StoreError;

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors raised while fetching from an upstream source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },

    #[error("Invalid source configuration: {0}")]
    InvalidSource(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Unknown collection {collection} for source {source_name}")]
    UnknownCollection {
        source_name: String,
        collection: String,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl FetchError {
    /// Network failures, timeouts, 429, 5xx and unparsable bodies are worth
    /// retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout(_) | FetchError::Decode { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}
