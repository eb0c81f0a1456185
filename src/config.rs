//! Configuration management for legiscache using the prefer crate.
//!
//! A config file is discovered with `prefer` (or given with `--config`) and
//! parsed by extension. Environment variables override the file; anything
//! left unset falls back to built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheOptions, TtlPolicy};
use crate::fetch::{default_sources, RetryPolicy, SourceConfig};
use crate::freshness::DEFAULT_MAX_AGE;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "LEGIS_DATA_DIR";
/// Environment variable naming the shared cache tier.
pub const CACHE_URL_ENV: &str = "CACHE_URL";
/// Environment variable selecting the rate limit backend.
pub const RATE_LIMIT_BACKEND_ENV: &str = "RATE_LIMIT_BACKEND";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config {path}: {reason}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration file structure. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    /// `memory` or a `redis://` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_backend: Option<String>,
    /// Shared cache tier URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_probe_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_sweep_threshold: Option<usize>,
    /// Default freshness threshold in hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<TtlPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_concurrency: Option<usize>,
    /// Upstream sources; replaces the built-in set when non-empty.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a `legiscache` config file in the standard locations.
    /// No file found means an empty config.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load("legiscache").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default()),
            },
            Err(e) => {
                tracing::debug!("No config file discovered: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_err = |format: &'static str, reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            reason,
        };

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| parse_err("TOML", e.to_string()))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| parse_err("YAML", e.to_string()))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| parse_err("JSON", e.to_string()))?,
        };

        tracing::debug!("Loaded config from {}", path.display());
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved against `base_dir`
    pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = Self::resolve_path(data_dir, base_dir);
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(retries) = self.max_retries {
            settings.retry.max_retries = retries;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            settings.retry.base_delay_ms = delay;
        }
        if let Some(ref backend) = self.rate_limit_backend {
            settings.rate_limit_backend = Some(backend.clone());
        }
        if let Some(ref url) = self.cache_url {
            settings.cache_url = Some(url.clone());
        }
        if let Some(secs) = self.cache_probe_interval_secs {
            settings.cache.probe_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = self.cache_sweep_threshold {
            settings.cache.sweep_threshold = threshold;
        }
        if let Some(hours) = self.max_age_hours {
            settings.max_age = Duration::from_secs(hours.saturating_mul(3600));
        }
        if let Some(ttl) = self.ttl {
            settings.ttl = ttl;
        }
        if let Some(n) = self.detail_concurrency {
            settings.detail_concurrency = n.max(1);
        }
        if !self.sources.is_empty() {
            settings.sources = self.sources.clone();
        }
    }
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the record store.
    pub data_dir: PathBuf,
    /// None means the built-in user agent.
    pub user_agent: Option<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// None means in-memory.
    pub rate_limit_backend: Option<String>,
    /// None means fast tier only.
    pub cache_url: Option<String>,
    pub cache: CacheOptions,
    pub max_age: Duration,
    pub ttl: TtlPolicy,
    pub detail_concurrency: usize,
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        // Platform data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("legiscache");

        Self {
            data_dir,
            user_agent: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            rate_limit_backend: None,
            cache_url: None,
            cache: CacheOptions::default(),
            max_age: DEFAULT_MAX_AGE,
            ttl: TtlPolicy::default(),
            detail_concurrency: crate::fetch::DEFAULT_DETAIL_CONCURRENCY,
            sources: default_sources(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Apply environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        if let Some(dir) = var(DATA_DIR_ENV) {
            tracing::debug!("Using {} from environment: {}", DATA_DIR_ENV, dir);
            self.data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }
        if let Some(url) = var(CACHE_URL_ENV) {
            tracing::debug!("Using {} from environment", CACHE_URL_ENV);
            self.cache_url = Some(url);
        }
        if let Some(backend) = var(RATE_LIMIT_BACKEND_ENV) {
            tracing::debug!(
                "Using {} from environment: {}",
                RATE_LIMIT_BACKEND_ENV,
                backend
            );
            self.rate_limit_backend = Some(backend);
        }
    }

    /// Check limits and collection wiring before anything runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut record_types: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, source) in &self.sources {
            url::Url::parse(&source.base_url).map_err(|e| {
                ConfigError::Invalid(format!(
                    "source {}: bad base_url {}: {}",
                    name, source.base_url, e
                ))
            })?;
            source
                .rate_limit
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("source {}: {}", name, e)))?;
            for collection in source.collections.values() {
                if let Some(other) = record_types.insert(&collection.record_type, name) {
                    if other != name.as_str() {
                        return Err(ConfigError::Invalid(format!(
                            "record type {} is produced by both {} and {}",
                            collection.record_type, other, name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Freshness threshold overrides by record type.
    pub fn max_age_overrides(&self) -> BTreeMap<String, Duration> {
        self.sources
            .values()
            .flat_map(|s| s.collections.values())
            .filter_map(|c| c.max_age().map(|age| (c.record_type.clone(), age)))
            .collect()
    }

    /// All configured record types.
    pub fn record_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .sources
            .values()
            .flat_map(|s| s.collections.values().map(|c| c.record_type.clone()))
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (--data flag); wins over file and environment.
    pub data_dir: Option<PathBuf>,
}

/// Load settings: file (explicit or discovered), then environment, then
/// command-line overrides.
pub async fn load_settings(options: LoadOptions) -> Result<(Settings, Config), ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env(|name| std::env::var(name).ok());

    if let Some(data_dir) = options.data_dir {
        settings.data_dir = data_dir;
    }

    settings.validate()?;
    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_load_toml_with_relative_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legiscache.toml");
        std::fs::write(
            &path,
            r#"
            data_dir = "./data"
            request_timeout = 10
            max_age_hours = 6

            [ttl]
            volatile = 30
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, &config.base_dir().unwrap());

        assert_eq!(settings.data_dir, dir.path().join("./data"));
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.max_age, Duration::from_secs(6 * 3600));
        assert_eq!(settings.ttl.volatile, 30);
        assert_eq!(settings.ttl.reference, TtlPolicy::default().reference);
        // No sources in the file keeps the built-in ones.
        assert!(settings.sources.contains_key("congress"));
    }

    #[tokio::test]
    async fn test_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("c.yaml");
        std::fs::write(&yaml, "max_retries: 7\ncache_url: redis://localhost\n").unwrap();
        let json = dir.path().join("c.json");
        std::fs::write(&json, r#"{"retry_base_delay_ms": 50}"#).unwrap();

        let y = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(y.max_retries, Some(7));
        assert_eq!(y.cache_url.as_deref(), Some("redis://localhost"));
        let j = Config::load_from_path(&json).await.unwrap();
        assert_eq!(j.retry_base_delay_ms, Some(50));
    }

    #[tokio::test]
    async fn test_parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "request_timeout = [").unwrap();

        let err = Config::load_from_path(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (DATA_DIR_ENV, "/srv/legis"),
            (CACHE_URL_ENV, "redis://cache:6379"),
            (RATE_LIMIT_BACKEND_ENV, ""),
        ]);
        let mut settings = Settings::default();
        settings.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.data_dir, PathBuf::from("/srv/legis"));
        assert_eq!(settings.cache_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(settings.rate_limit_backend, None);
    }

    #[test]
    fn test_huge_max_age_saturates() {
        let config = Config {
            max_age_hours: Some(u64::MAX),
            ..Default::default()
        };
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("."));

        assert_eq!(settings.max_age, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(
            settings.record_types(),
            vec!["bills", "committees", "filings", "house-votes", "members"]
        );
        assert_eq!(
            settings.max_age_overrides().get("filings"),
            Some(&Duration::from_secs(12 * 3600))
        );
    }

    #[test]
    fn test_duplicate_record_type_rejected() {
        let mut settings = Settings::default();
        let mut lda = settings.sources["lda"].clone();
        let bills = settings.sources["congress"].collections["bills"].clone();
        lda.collections.insert("bills".to_string(), bills);
        settings.sources.insert("lda".to_string(), lda);

        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut settings = Settings::default();
        if let Some(congress) = settings.sources.get_mut("congress") {
            congress.base_url = "api.congress.gov/v3".to_string();
        }

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("congress"));
    }
}
