//! Configuration loading and management
//!
//! Configuration is loaded once at startup from `~/.config/loglens/config.toml`,
//! then `LOGLENS_*` environment variables are applied on top. Components only
//! ever see the resolved [`Config`] value.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/loglens/` (~/.config/loglens/)
//! - Data: `$XDG_DATA_HOME/loglens/` (~/.local/share/loglens/)
//! - State/Logs: `$XDG_STATE_HOME/loglens/` (~/.local/state/loglens/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Maximum items the durable store accepts in one batch write request.
pub const MAX_WRITE_CHUNK: usize = 25;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Where the database and blobs live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Streaming ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Event query settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Queue worker settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage locations. Unset paths fall back to the XDG data directory.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: Option<PathBuf>,
    /// Root directory of the local blob store
    pub blob_dir: Option<PathBuf>,
}

/// Streaming aggregator and event sink settings
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Events buffered before a durable flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Items per batch write request (at most [`MAX_WRITE_CHUNK`])
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,

    /// Lines between progress callbacks
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            write_chunk_size: default_write_chunk_size(),
            progress_every: default_progress_every(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_write_chunk_size() -> usize {
    MAX_WRITE_CHUNK
}

fn default_progress_every() -> u64 {
    10_000
}

/// Query engine settings
#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    /// Items the store returns per continuation page
    #[serde(default = "default_store_page_size")]
    pub store_page_size: usize,

    /// Page size used when a caller does not pass one
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound on caller-supplied page sizes
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            store_page_size: default_store_page_size(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_store_page_size() -> usize {
    1000
}

fn default_limit() -> usize {
    100
}

fn default_max_limit() -> usize {
    1000
}

/// Queue worker settings
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Units received per poll
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Visibility lease granted on receive, in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Interval between lease extensions while a run is in flight
    #[serde(default = "default_lease_extend")]
    pub lease_extend_secs: u64,

    /// Sleep between empty polls, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            visibility_timeout_secs: default_visibility_timeout(),
            lease_extend_secs: default_lease_extend(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_max_messages() -> usize {
    5
}

fn default_visibility_timeout() -> u64 {
    60
}

fn default_lease_extend() -> u64 {
    45
}

fn default_poll_interval() -> u64 {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Apply `LOGLENS_*` overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("LOGLENS_DATABASE") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("LOGLENS_BLOB_DIR") {
            self.storage.blob_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("LOGLENS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(size) = lookup("LOGLENS_BATCH_SIZE").and_then(|s| s.parse().ok()) {
            self.ingest.batch_size = size;
        }
    }

    /// Validate configuration ranges
    pub fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            return Err(Error::Config(
                "ingest.batch_size must be at least 1".to_string(),
            ));
        }
        if self.ingest.write_chunk_size == 0 || self.ingest.write_chunk_size > MAX_WRITE_CHUNK {
            return Err(Error::Config(format!(
                "ingest.write_chunk_size must be between 1 and {}",
                MAX_WRITE_CHUNK
            )));
        }
        if self.query.store_page_size == 0 || self.query.default_limit == 0 {
            return Err(Error::Config(
                "query page sizes must be at least 1".to_string(),
            ));
        }
        if self.query.default_limit > self.query.max_limit {
            return Err(Error::Config(
                "query.default_limit must not exceed query.max_limit".to_string(),
            ));
        }
        if self.worker.lease_extend_secs == 0
            || self.worker.lease_extend_secs >= self.worker.visibility_timeout_secs
        {
            return Err(Error::Config(
                "worker.lease_extend_secs must be shorter than worker.visibility_timeout_secs"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved database path
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("loglens.db"))
    }

    /// Resolved blob store root
    pub fn blob_dir(&self) -> PathBuf {
        self.storage
            .blob_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("blobs"))
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/loglens/config.toml` (~/.config/loglens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("loglens").join("config.toml")
    }

    /// Returns the data directory path (database and blobs)
    ///
    /// `$XDG_DATA_HOME/loglens/` (~/.local/share/loglens/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("loglens")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/loglens/` (~/.local/state/loglens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("loglens")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("loglens.log")
    }
}
