//! File-backed record store.
//!
//! Layout under the data directory:
//!
//! ```text
//! {root}/{record_type}/records/{urlencoded id}.json
//! {root}/{record_type}/manifest.json
//! {root}/{record_type}/fetch_metadata.json
//! ```
//!
//! Nothing outside this module interprets that layout.

mod atomic;
mod manifest;
mod metadata;
mod record;

pub use atomic::write_json_atomic;
pub use manifest::Manifest;
pub use metadata::{FetchMetadata, FetchStatus};
pub use record::Record;

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use record::StoredRecord;

const RECORDS_DIR: &str = "records";
const MANIFEST_FILE: &str = "manifest.json";
const METADATA_FILE: &str = "fetch_metadata.json";
const RECORD_EXT: &str = "json";

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid record type '{0}'")]
    InvalidRecordType(String),
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("Corrupt record at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Persists one JSON document per `(record_type, identifier)` plus a manifest
/// and fetch metadata per record type.
pub struct RecordStore {
    root: PathBuf,
    /// Serializes manifest read-merge-write per record type.
    manifest_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, record_type: &str) -> StoreResult<PathBuf> {
        validate_record_type(record_type)?;
        Ok(self.root.join(record_type))
    }

    /// Path of the record file for an identifier.
    pub fn record_path(&self, record_type: &str, identifier: &str) -> StoreResult<PathBuf> {
        if identifier.is_empty() {
            return Err(StoreError::InvalidIdentifier(identifier.to_string()));
        }
        let filename = format!("{}.{}", urlencoding::encode(identifier), RECORD_EXT);
        Ok(self.type_dir(record_type)?.join(RECORDS_DIR).join(filename))
    }

    fn manifest_path(&self, record_type: &str) -> StoreResult<PathBuf> {
        Ok(self.type_dir(record_type)?.join(MANIFEST_FILE))
    }

    fn metadata_path(&self, record_type: &str) -> StoreResult<PathBuf> {
        Ok(self.type_dir(record_type)?.join(METADATA_FILE))
    }

    fn manifest_lock(&self, record_type: &str) -> Arc<Mutex<()>> {
        let mut locks = match self.manifest_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(record_type.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Atomically persist a record. Returns where it was written.
    ///
    /// Concurrent writers to the same identifier resolve last-writer-wins.
    pub fn put(&self, record_type: &str, identifier: &str, record: &Record) -> StoreResult<PathBuf> {
        let path = self.record_path(record_type, identifier)?;
        let stored = StoredRecord {
            record_type: record_type.to_string(),
            identifier: identifier.to_string(),
            record: record.clone(),
        };
        write_json_atomic(&path, &stored)?;
        debug!("Stored {}/{} at {}", record_type, identifier, path.display());
        Ok(path)
    }

    /// Load a record, or `None` if it was never stored.
    pub fn get(&self, record_type: &str, identifier: &str) -> StoreResult<Option<Record>> {
        let path = self.record_path(record_type, identifier)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored = parse_stored(&path, &bytes, record_type, identifier)?;
        Ok(Some(stored.record))
    }

    /// Read the manifest. Missing or unparsable manifests read as `None`.
    pub fn load_manifest(&self, record_type: &str) -> Option<Manifest> {
        let path = self.manifest_path(record_type).ok()?;
        read_json_lenient(&path, "manifest")
    }

    /// Identifiers already persisted for a record type, in no particular order.
    pub fn list_identifiers(&self, record_type: &str) -> HashSet<String> {
        self.load_manifest(record_type)
            .map(|m| m.identifiers.into_iter().collect())
            .unwrap_or_default()
    }

    /// Merge identifiers into the manifest and stamp it with `timestamp`.
    ///
    /// Idempotent. Holds the per-type manifest lock only for the
    /// read-merge-write. Returns how many identifiers were new.
    pub fn append_manifest<I>(
        &self,
        record_type: &str,
        identifiers: I,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let path = self.manifest_path(record_type)?;
        let lock = self.manifest_lock(record_type);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A corrupt manifest is rebuilt from the merge; an unreadable one is an error.
        let mut manifest = read_json_checked::<Manifest>(&path, "manifest")?.unwrap_or_default();
        let added = manifest.merge(identifiers, timestamp);
        write_json_atomic(&path, &manifest)?;

        debug!(
            "Manifest {}: +{} identifiers (total {})",
            record_type, added, manifest.count
        );
        Ok(added)
    }

    /// Rewrite the manifest from the records actually on disk, dropping
    /// anything that is missing or does not parse.
    pub fn rebuild_manifest(&self, record_type: &str) -> StoreResult<Manifest> {
        let records_dir = self.type_dir(record_type)?.join(RECORDS_DIR);
        let path = self.manifest_path(record_type)?;
        let lock = self.manifest_lock(record_type);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut valid = Vec::new();
        let mut invalid = 0usize;
        let entries = match std::fs::read_dir(&records_dir) {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        for entry in entries.into_iter().flatten() {
            let entry = entry?;
            let file_path = entry.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(identifier) = identifier_from_path(&file_path) else {
                invalid += 1;
                continue;
            };
            let parsed = std::fs::read(&file_path)
                .map_err(StoreError::from)
                .and_then(|bytes| parse_stored(&file_path, &bytes, record_type, &identifier));
            match parsed {
                Ok(_) => valid.push(identifier),
                Err(e) => {
                    warn!("Skipping invalid record {}: {}", file_path.display(), e);
                    invalid += 1;
                }
            }
        }

        let mut manifest = Manifest::default();
        manifest.merge(valid, Utc::now());
        write_json_atomic(&path, &manifest)?;

        info!(
            "Rebuilt manifest for {}: {} records ({} invalid skipped)",
            record_type, manifest.count, invalid
        );
        Ok(manifest)
    }

    /// Load every manifested record of a type. Records that have gone missing
    /// or fail to parse are skipped with a warning.
    pub fn load_all(&self, record_type: &str) -> StoreResult<Vec<(String, Record)>> {
        validate_record_type(record_type)?;
        let mut identifiers: Vec<String> = self.list_identifiers(record_type).into_iter().collect();
        identifiers.sort();

        let mut records = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            match self.get(record_type, &identifier) {
                Ok(Some(record)) => records.push((identifier, record)),
                Ok(None) => warn!("Manifest lists {}/{} but it is missing", record_type, identifier),
                Err(e) => warn!("Failed to load {}/{}: {}", record_type, identifier, e),
            }
        }
        Ok(records)
    }

    /// Fetch metadata for a record type. Missing or corrupt reads as `None`.
    pub fn read_metadata(&self, record_type: &str) -> Option<FetchMetadata> {
        let path = self.metadata_path(record_type).ok()?;
        read_json_lenient(&path, "fetch metadata")
    }

    pub fn write_metadata(&self, record_type: &str, metadata: &FetchMetadata) -> StoreResult<()> {
        let path = self.metadata_path(record_type)?;
        write_json_atomic(&path, metadata)?;
        Ok(())
    }

    /// Record types that have a directory under the root.
    pub fn record_types(&self) -> Vec<String> {
        let mut types: Vec<String> = std::fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .filter(|name| validate_record_type(name).is_ok())
                    .collect()
            })
            .unwrap_or_default();
        types.sort();
        types
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Record types become directory names: ASCII alphanumerics, `-` and `_` only.
fn validate_record_type(record_type: &str) -> StoreResult<()> {
    let valid = !record_type.is_empty()
        && record_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidRecordType(record_type.to_string()))
    }
}

fn identifier_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    urlencoding::decode(stem).ok().map(|s| s.into_owned())
}

fn parse_stored(
    path: &Path,
    bytes: &[u8],
    record_type: &str,
    identifier: &str,
) -> StoreResult<StoredRecord> {
    let stored: StoredRecord = serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if stored.record_type != record_type || stored.identifier != identifier {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!(
                "envelope says {}/{}",
                stored.record_type, stored.identifier
            ),
        });
    }
    Ok(stored)
}

/// Read a JSON file, treating absence and corruption alike as `None`.
fn read_json_lenient<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Option<T> {
    match read_json_checked(path, what) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to read {} {}: {}", what, path.display(), e);
            None
        }
    }
}

/// Missing or corrupt files read as `None`; any other I/O failure is returned.
fn read_json_checked<T: serde::de::DeserializeOwned>(
    path: &Path,
    what: &str,
) -> StoreResult<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Io(e)),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(
                "Ignoring corrupt {} {} (treated as absent): {}",
                what,
                path.display(),
                e
            );
            Ok(None)
        }
    }
}
