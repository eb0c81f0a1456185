//! Per-record-type index of persisted identifiers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifiers already persisted for one record type.
///
/// Every identifier here must have a structurally valid record on disk; the
/// fetch client only adds identifiers after their `put` succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub count: usize,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub identifiers: BTreeSet<String>,
}

impl Manifest {
    /// Merge identifiers and stamp the update time. Re-adding an existing
    /// identifier is a no-op. Returns how many were new.
    pub fn merge<I>(&mut self, identifiers: I, timestamp: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.identifiers.len();
        self.identifiers.extend(identifiers);
        self.count = self.identifiers.len();
        self.last_updated = Some(timestamp);
        self.count - before
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}
