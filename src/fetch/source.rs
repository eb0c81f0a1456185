//! Upstream source definitions.
//!
//! These structs define the configurable behaviour of a source: where it
//! lives, how fast it may be called, how it paginates, and which
//! collections it exposes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::extract::{extract_path, render_template, scalar_string};
use crate::rate_limit::RateLimitConfig;

/// One upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Static query parameters sent with every request (e.g. `format`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionConfig>,
}

fn default_page_size() -> u32 {
    100
}

impl SourceConfig {
    pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.get(name)
    }
}

/// How a source splits a collection into pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Pagination {
    /// `?offset=N&limit=M`, offset counted in items.
    Offset {
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
        /// Response path of the next-page link; null there means done.
        #[serde(default)]
        next_path: Option<String>,
    },
    /// `?page=N&page_size=M`, pages counted from 1.
    Page {
        #[serde(default = "default_page_param")]
        page_param: String,
        #[serde(default = "default_size_param")]
        size_param: String,
        #[serde(default)]
        next_path: Option<String>,
    },
    /// Opaque cursor read from the response and echoed back.
    Cursor {
        #[serde(default = "default_cursor_param")]
        cursor_param: String,
        #[serde(default)]
        size_param: Option<String>,
        #[serde(default = "default_cursor_path")]
        next_path: String,
    },
}

fn default_offset_param() -> String {
    "offset".to_string()
}
fn default_limit_param() -> String {
    "limit".to_string()
}
fn default_page_param() -> String {
    "page".to_string()
}
fn default_size_param() -> String {
    "page_size".to_string()
}
fn default_cursor_param() -> String {
    "cursor".to_string()
}
fn default_cursor_path() -> String {
    "next_cursor".to_string()
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::Offset {
            offset_param: default_offset_param(),
            limit_param: default_limit_param(),
            next_path: None,
        }
    }
}

impl Pagination {
    /// Query parameters for page `index` (0-based).
    pub fn page_query(
        &self,
        index: usize,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Vec<(String, String)> {
        match self {
            Pagination::Offset {
                offset_param,
                limit_param,
                ..
            } => vec![
                (offset_param.clone(), (index * page_size as usize).to_string()),
                (limit_param.clone(), page_size.to_string()),
            ],
            Pagination::Page {
                page_param,
                size_param,
                ..
            } => vec![
                (page_param.clone(), (index + 1).to_string()),
                (size_param.clone(), page_size.to_string()),
            ],
            Pagination::Cursor {
                cursor_param,
                size_param,
                ..
            } => {
                let mut query = Vec::new();
                if let Some(cursor) = cursor {
                    query.push((cursor_param.clone(), cursor.to_string()));
                }
                if let Some(size_param) = size_param {
                    query.push((size_param.clone(), page_size.to_string()));
                }
                query
            }
        }
    }

    /// Whether another page follows `response`, which carried
    /// `received` items. For cursor pagination, also the next cursor.
    pub fn next_page(
        &self,
        response: &Value,
        received: usize,
        page_size: u32,
    ) -> (bool, Option<String>) {
        if received == 0 {
            return (false, None);
        }
        match self {
            Pagination::Offset { next_path, .. } | Pagination::Page { next_path, .. } => {
                let short = received < page_size as usize;
                let link_ended = next_path
                    .as_deref()
                    .is_some_and(|p| extract_path(response, p).is_null());
                (!short && !link_ended, None)
            }
            Pagination::Cursor { next_path, .. } => {
                let cursor = scalar_string(extract_path(response, next_path));
                (cursor.is_some(), cursor)
            }
        }
    }
}

/// A collection exposed by a source, persisted under one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Record type the items are stored under.
    pub record_type: String,
    /// List endpoint, relative to the source's base URL.
    pub path: String,
    /// Where the item array sits in a list response.
    #[serde(default = "default_results_path")]
    pub results_path: String,
    pub id: IdSpec,
    /// Per-item endpoint template; when set, the detail document is stored
    /// instead of the list item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_results_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Freshness threshold override, in hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
}

fn default_results_path() -> String {
    "results".to_string()
}

impl CollectionConfig {
    pub fn new(record_type: &str, path: &str, results_path: &str, id: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            path: path.to_string(),
            results_path: results_path.to_string(),
            id: IdSpec::new(id),
            detail_path: None,
            detail_results_path: None,
            page_size: None,
            max_age_hours: None,
            query: BTreeMap::new(),
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_hours.map(|h| Duration::from_secs(h.saturating_mul(3600)))
    }
}

/// How to derive an item's identifier: a `{path}` template such as
/// `{congress}-{type}-{number}`, or a single dot path such as `filing_uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdSpec(String);

impl IdSpec {
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn extract(&self, item: &Value) -> Option<String> {
        if self.0.contains('{') {
            render_template(&self.0, item)
        } else {
            scalar_string(extract_path(item, &self.0))
        }
    }
}

/// Built-in definitions of the Congress.gov and Senate LDA APIs.
pub fn default_sources() -> BTreeMap<String, SourceConfig> {
    let mut sources = BTreeMap::new();

    let congress_collections = [
        CollectionConfig::new("bills", "/bill", "bills", "{congress}-{type}-{number}"),
        CollectionConfig::new("members", "/member", "members", "bioguideId"),
        CollectionConfig::new("committees", "/committee", "committees", "systemCode"),
        CollectionConfig::new(
            "house-votes",
            "/house-vote",
            "houseRollCallVotes",
            "{congress}-{sessionNumber}-{rollCallNumber}",
        ),
    ];
    sources.insert(
        "congress".to_string(),
        SourceConfig {
            base_url: "https://api.congress.gov/v3".to_string(),
            rate_limit: RateLimitConfig {
                max_requests: 5000,
                window: Duration::from_secs(3600),
            },
            pagination: Pagination::Offset {
                offset_param: default_offset_param(),
                limit_param: default_limit_param(),
                next_path: Some("pagination.next".to_string()),
            },
            page_size: 250,
            query: BTreeMap::from([("format".to_string(), "json".to_string())]),
            collections: congress_collections
                .into_iter()
                .map(|c| (c.record_type.clone(), c))
                .collect(),
        },
    );

    let mut filings = CollectionConfig::new("filings", "/filings/", "results", "filing_uuid");
    filings.max_age_hours = Some(12);
    sources.insert(
        "lda".to_string(),
        SourceConfig {
            base_url: "https://lda.senate.gov/api/v1".to_string(),
            rate_limit: RateLimitConfig {
                max_requests: 15,
                window: Duration::from_secs(60),
            },
            pagination: Pagination::Page {
                page_param: default_page_param(),
                size_param: default_size_param(),
                next_path: Some("next".to_string()),
            },
            page_size: 25,
            query: BTreeMap::new(),
            collections: BTreeMap::from([("filings".to_string(), filings)]),
        },
    );

    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offset_page_query() {
        let p = Pagination::default();
        assert_eq!(
            p.page_query(2, 250, None),
            vec![
                ("offset".to_string(), "500".to_string()),
                ("limit".to_string(), "250".to_string())
            ]
        );
    }

    #[test]
    fn test_page_numbers_start_at_one() {
        let p = Pagination::Page {
            page_param: "page".into(),
            size_param: "page_size".into(),
            next_path: None,
        };
        assert_eq!(p.page_query(0, 25, None)[0], ("page".into(), "1".into()));
    }

    #[test]
    fn test_short_page_is_last() {
        let p = Pagination::default();
        assert_eq!(p.next_page(&json!({}), 200, 200), (true, None));
        assert_eq!(p.next_page(&json!({}), 50, 200), (false, None));
        assert_eq!(p.next_page(&json!({}), 0, 200), (false, None));
    }

    #[test]
    fn test_null_next_link_ends_pagination() {
        let p = Pagination::Page {
            page_param: "page".into(),
            size_param: "page_size".into(),
            next_path: Some("next".into()),
        };
        assert!(!p.next_page(&json!({"next": null}), 25, 25).0);
        assert!(p.next_page(&json!({"next": "https://x?page=3"}), 25, 25).0);
    }

    #[test]
    fn test_cursor_pagination() {
        let p = Pagination::Cursor {
            cursor_param: "cursor".into(),
            size_param: None,
            next_path: "meta.next".into(),
        };
        let (more, cursor) = p.next_page(&json!({"meta": {"next": "abc"}}), 10, 100);
        assert!(more);
        assert_eq!(cursor.as_deref(), Some("abc"));
        assert_eq!(
            p.page_query(1, 100, cursor.as_deref()),
            vec![("cursor".to_string(), "abc".to_string())]
        );
        assert!(!p.next_page(&json!({"meta": {}}), 10, 100).0);
    }

    #[test]
    fn test_id_spec() {
        let bill = json!({"congress": 118, "type": "S", "number": "42"});
        assert_eq!(
            IdSpec::new("{congress}-{type}-{number}")
                .extract(&bill)
                .as_deref(),
            Some("118-S-42")
        );
        assert_eq!(
            IdSpec::new("number").extract(&bill).as_deref(),
            Some("42")
        );
        assert_eq!(IdSpec::new("bioguideId").extract(&bill), None);
    }

    #[test]
    fn test_collection_max_age_saturates() {
        let mut collection = CollectionConfig::new("bills", "/bill", "bills", "number");
        assert_eq!(collection.max_age(), None);

        collection.max_age_hours = Some(2);
        assert_eq!(collection.max_age(), Some(Duration::from_secs(7200)));

        collection.max_age_hours = Some(u64::MAX);
        assert_eq!(collection.max_age(), Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_default_sources() {
        let sources = default_sources();
        let congress = &sources["congress"];
        assert_eq!(congress.page_size, 250);
        assert!(congress.collection("bills").is_some());
        assert!(congress.rate_limit.validate().is_ok());
        assert_eq!(sources["lda"].rate_limit.max_requests, 15);
    }

    #[test]
    fn test_source_from_toml() {
        let source: SourceConfig = toml::from_str(
            r#"
            base_url = "https://example.org/api"
            page_size = 50

            [rate_limit]
            max_requests = 10
            window = 60

            [pagination]
            type = "page"

            [collections.widgets]
            record_type = "widgets"
            path = "/widgets"
            id = "uuid"
            "#,
        )
        .unwrap();
        assert_eq!(source.page_size, 50);
        assert!(matches!(source.pagination, Pagination::Page { .. }));
        assert_eq!(source.collections["widgets"].results_path, "results");
        assert_eq!(source.rate_limit.window, Duration::from_secs(60));
    }
}
