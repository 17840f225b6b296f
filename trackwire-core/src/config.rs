//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/trackwire/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/trackwire/` (~/.config/trackwire/)
//! - Data: `$XDG_DATA_HOME/trackwire/` (~/.local/share/trackwire/)
//! - State/Logs: `$XDG_STATE_HOME/trackwire/` (~/.local/state/trackwire/)
//!
//! Delivery options are snake_case; the camelCase names used by browser
//! SDKs (`maxQueueSize`, `retryDelay`, ...) are accepted as aliases.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

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
    /// Project the reported events belong to
    #[serde(default)]
    pub project_id: Option<String>,

    /// Collection endpoint base URL; batches are POSTed to `{endpoint}/report`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// User id to use when none has been persisted yet
    #[serde(default)]
    pub user_id: Option<String>,

    /// Delivery scheduling
    #[serde(default)]
    pub track: TrackConfig,

    /// HTTP transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Durable storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Delivery scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TrackConfig {
    /// Idle-time processing
    #[serde(default)]
    pub idle: IdleConfig,

    /// Batched lane
    #[serde(default)]
    pub batch: BatchConfig,

    /// Immediate lane
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Delivery attempts per batch before it is persisted
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Interval between replays of the failed-batch store
    #[serde(default = "default_failed_retry_delay", alias = "failedRetryDelay")]
    pub failed_retry_delay_ms: u64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            idle: IdleConfig::default(),
            batch: BatchConfig::default(),
            realtime: RealtimeConfig::default(),
            max_retries: default_max_retries(),
            failed_retry_delay_ms: default_failed_retry_delay(),
        }
    }
}

impl TrackConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch.delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.realtime.retry_delay_ms)
    }

    pub fn failed_retry_delay(&self) -> Duration {
        Duration::from_millis(self.failed_retry_delay_ms)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch.max_queue_size == 0 {
            return Err(Error::Config(
                "track.batch.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::Config(
                "track.max_retries must be at least 1".to_string(),
            ));
        }
        if self.failed_retry_delay_ms == 0 {
            return Err(Error::Config(
                "track.failed_retry_delay_ms must be positive".to_string(),
            ));
        }
        if self.idle.max_tasks_per_idle == 0 {
            return Err(Error::Config(
                "track.idle.max_tasks_per_idle must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Idle-time scheduling
///
/// Accepted and validated for compatibility with existing configurations.
/// The scheduler does not read these values: a size-triggered flush runs
/// after a single scheduler yield, which is always sooner than `timeout_ms`.
#[derive(Debug, Deserialize, Clone)]
pub struct IdleConfig {
    /// Longest a deferred flush may wait for an idle point
    #[serde(default = "default_idle_timeout", alias = "timeout")]
    pub timeout_ms: u64,

    /// Batches handed to the transport per idle slice
    #[serde(default = "default_max_tasks_per_idle", alias = "maxTasksPerIdle")]
    pub max_tasks_per_idle: usize,

    /// Polling interval when the host has no idle signal
    #[serde(default = "default_fallback_interval", alias = "fallbackInterval")]
    pub fallback_interval_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_idle_timeout(),
            max_tasks_per_idle: default_max_tasks_per_idle(),
            fallback_interval_ms: default_fallback_interval(),
        }
    }
}

/// Batched lane
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Debounce before a partial batch is flushed
    #[serde(default = "default_batch_delay", alias = "delay")]
    pub delay_ms: u64,

    /// Buffer length that forces a flush
    #[serde(default = "default_max_queue_size", alias = "maxQueueSize")]
    pub max_queue_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_batch_delay(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

/// Immediate lane
#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    /// Route error events through the immediate lane
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay before a failed batch is attempted again
    #[serde(default = "default_retry_delay", alias = "retryDelay")]
    pub retry_delay_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    1000
}

fn default_max_tasks_per_idle() -> usize {
    5
}

fn default_fallback_interval() -> u64 {
    1000
}

fn default_batch_delay() -> u64 {
    5000
}

fn default_max_queue_size() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_failed_retry_delay() -> u64 {
    5 * 60 * 1000
}

/// HTTP transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// Request timeout in milliseconds
    #[serde(default = "default_transport_timeout")]
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_transport_timeout(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_transport_timeout() -> u64 {
    5000
}

/// Durable storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Override for the database file (default: XDG data dir)
    pub path: Option<PathBuf>,

    /// Cap on the serialized size of the failed-batch store
    #[serde(default = "default_max_failed_bytes")]
    pub max_failed_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_failed_bytes: default_max_failed_bytes(),
        }
    }
}

impl StorageConfig {
    /// Database file to open, honouring the override
    pub fn database_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::database_path)
    }
}

fn default_max_failed_bytes() -> usize {
    1024 * 1024
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
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Check that the pipeline can be started with this configuration
    pub fn validate(&self) -> Result<()> {
        if self.project_id.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config("project_id is required".to_string()));
        }
        match self.endpoint.as_deref() {
            None | Some("") => return Err(Error::Config("endpoint is required".to_string())),
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(Error::Config(format!(
                    "endpoint must be an http(s) URL, got {}",
                    url
                )))
            }
            _ => {}
        }
        if self.transport.timeout_ms == 0 {
            return Err(Error::Config(
                "transport.timeout_ms must be positive".to_string(),
            ));
        }
        self.track.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/trackwire/config.toml` (~/.config/trackwire/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("trackwire").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    ///
    /// `$XDG_DATA_HOME/trackwire/` (~/.local/share/trackwire/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("trackwire")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/trackwire/` (~/.local/state/trackwire/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("trackwire")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/trackwire/trackwire.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("trackwire.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/trackwire/trackwire.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("trackwire.log")
    }
}
