//! Engine configuration
//!
//! `SyncConfig` holds every tunable of the sync engine. Values come from, in
//! increasing precedence: built-in defaults, an optional TOML file, and the
//! `WATCHSYNC_API_URL` environment variable.
//!
//! ```toml
//! api_base_url = "https://api.example.com"
//! sync_interval_ms = 30000
//! max_retries = 3
//! base_retry_delay_ms = 5000
//! max_retry_delay_ms = 30000
//! debounce_window_ms = 300
//! conflict_history_limit = 10
//! request_timeout_ms = 15000
//! default_policy = "latest"
//! storage_dir = "/var/lib/watchsync"
//! ```

use crate::sync::conflict_resolver::ResolutionPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default server URL
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";

/// Environment variable overriding the server URL
pub const API_URL_ENV: &str = "WATCHSYNC_API_URL";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the progress service
    pub api_base_url: String,
    /// Period of the background sync timer
    pub sync_interval: Duration,
    /// Failed attempts per cycle before `sync_failed`
    pub max_retries: u32,
    /// First backoff delay
    pub base_retry_delay: Duration,
    /// Backoff ceiling
    pub max_retry_delay: Duration,
    /// Coalescing window of the debouncer
    pub debounce_window: Duration,
    /// Conflict records kept per item
    pub conflict_history_limit: usize,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// Policy used when the caller does not pick one
    pub default_policy: ResolutionPolicy,
    /// Directory holding the progress database
    pub storage_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            sync_interval: Duration::from_secs(30),
            max_retries: 3,
            base_retry_delay: Duration::from_millis(5_000),
            max_retry_delay: Duration::from_millis(30_000),
            debounce_window: Duration::from_millis(300),
            conflict_history_limit: 10,
            request_timeout: Duration::from_secs(15),
            default_policy: ResolutionPolicy::Latest,
            storage_dir: default_storage_dir(),
        }
    }
}

/// Platform data directory for persisted state
fn default_storage_dir() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    path.push("watchsync");
    path
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                SyncConfigBuilder::from_toml(&raw)?
            }
            None => SyncConfig::builder(),
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            builder = builder.api_base_url(url);
        }

        builder.build()
    }

    /// Full URL of an API path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::InvalidUrl("empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(url.to_string()));
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sync_interval",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.base_retry_delay > self.max_retry_delay {
            return Err(ConfigError::InvalidValue {
                field: "base_retry_delay",
                message: format!(
                    "{:?} exceeds max_retry_delay {:?}",
                    self.base_retry_delay, self.max_retry_delay
                ),
            });
        }
        if self.conflict_history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conflict_history_limit",
                message: "must keep at least one record".to_string(),
            });
        }
        Ok(())
    }
}

/// On-disk shape of the config file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_base_url: Option<String>,
    sync_interval_ms: Option<u64>,
    max_retries: Option<u32>,
    base_retry_delay_ms: Option<u64>,
    max_retry_delay_ms: Option<u64>,
    debounce_window_ms: Option<u64>,
    conflict_history_limit: Option<usize>,
    request_timeout_ms: Option<u64>,
    default_policy: Option<ResolutionPolicy>,
    storage_dir: Option<PathBuf>,
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Start from the values in a TOML document
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(raw)?;
        let mut builder = SyncConfigBuilder::default();
        let config = &mut builder.config;

        if let Some(url) = file.api_base_url {
            config.api_base_url = url;
        }
        if let Some(ms) = file.sync_interval_ms {
            config.sync_interval = Duration::from_millis(ms);
        }
        if let Some(retries) = file.max_retries {
            config.max_retries = retries;
        }
        if let Some(ms) = file.base_retry_delay_ms {
            config.base_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.max_retry_delay_ms {
            config.max_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.debounce_window_ms {
            config.debounce_window = Duration::from_millis(ms);
        }
        if let Some(limit) = file.conflict_history_limit {
            config.conflict_history_limit = limit;
        }
        if let Some(ms) = file.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = file.default_policy {
            config.default_policy = policy;
        }
        if let Some(dir) = file.storage_dir {
            config.storage_dir = dir;
        }

        Ok(builder)
    }

    /// Set the server URL
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    /// Set the background sync period
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    /// Set the retry ceiling
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the backoff base and cap
    pub fn retry_delays(mut self, base: Duration, cap: Duration) -> Self {
        self.config.base_retry_delay = base;
        self.config.max_retry_delay = cap;
        self
    }

    /// Set the debounce window
    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.config.debounce_window = window;
        self
    }

    /// Set the number of conflict records kept per item
    pub fn conflict_history_limit(mut self, limit: usize) -> Self {
        self.config.conflict_history_limit = limit;
        self
    }

    /// Set the HTTP request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the default resolution policy
    pub fn default_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.config.default_policy = policy;
        self
    }

    /// Set the storage directory
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::builder().build().unwrap();
        assert_eq!(config.api_base_url, "http://127.0.0.1:3000");
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_retry_delay, Duration::from_millis(5_000));
        assert_eq!(config.max_retry_delay, Duration::from_millis(30_000));
        assert_eq!(config.debounce_window, Duration::from_millis(300));
        assert_eq!(config.conflict_history_limit, 10);
        assert_eq!(config.default_policy, ResolutionPolicy::Latest);
    }

    #[test]
    fn test_api_url() {
        let config = SyncConfig::builder()
            .api_base_url("https://progress.example.com/")
            .build()
            .unwrap();
        assert_eq!(
            config.api_url("/watch-progress/sync"),
            "https://progress.example.com/watch-progress/sync"
        );
    }

    #[test]
    fn test_from_toml() {
        let raw = r#"
            api_base_url = "https://progress.example.com"
            sync_interval_ms = 10000
            max_retries = 5
            default_policy = "merge"
        "#;
        let config = SyncConfigBuilder::from_toml(raw).unwrap().build().unwrap();
        assert_eq!(config.sync_interval, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.default_policy, ResolutionPolicy::Merge);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        let result = SyncConfigBuilder::from_toml("sync_every = 3");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_values() {
        let result = SyncConfig::builder().api_base_url("ftp://nope").build();
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));

        let result = SyncConfig::builder()
            .retry_delays(Duration::from_secs(60), Duration::from_secs(30))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "base_retry_delay", .. })
        ));

        let result = SyncConfig::builder().sync_interval(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchsync.toml");
        std::fs::write(&path, "conflict_history_limit = 4\n").unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.conflict_history_limit, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let result = SyncConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
