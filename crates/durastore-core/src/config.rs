// ABOUTME: Configuration for a durastore instance: root directory, retry budget, retention window.
// ABOUTME: Loads from DURASTORE_* environment variables with validated defaults.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid number: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("DURASTORE_MAX_RETRIES must be at least 1")]
    ZeroRetries,
}

/// Settings for a store rooted at `root`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    /// Total write attempts per `save`, including the first.
    pub max_retries: u32,
    /// Backoff unit; attempt `n` sleeps `retry_base_delay * n` before retrying.
    pub retry_base_delay: Duration,
    pub backup_retention: Duration,
    /// Multiplier applied to an expected write size before checking free space.
    pub space_margin: f64,
    /// Multiplier for blob writes, which briefly need room for a temp copy.
    pub blob_headroom: f64,
}

impl StoreConfig {
    /// Defaults rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_DELAY,
            backup_retention: retention_days(DEFAULT_RETENTION_DAYS),
            space_margin: 1.2,
            blob_headroom: 2.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_backup_retention(mut self, retention: Duration) -> Self {
        self.backup_retention = retention;
        self
    }

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - DURASTORE_HOME: root data directory (default: ~/.durastore)
    /// - DURASTORE_MAX_RETRIES: write attempts per save (default: 3)
    /// - DURASTORE_RETRY_DELAY_MS: backoff unit in milliseconds (default: 100)
    /// - DURASTORE_BACKUP_RETENTION_DAYS: backup retention window (default: 7)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = lookup("DURASTORE_HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                lookup("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".durastore")
            });

        let mut config = Self::new(root);

        if let Some(retries) = parse_var::<u32, _>(&lookup, "DURASTORE_MAX_RETRIES")? {
            if retries == 0 {
                return Err(ConfigError::ZeroRetries);
            }
            config.max_retries = retries;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "DURASTORE_RETRY_DELAY_MS")? {
            config.retry_base_delay = Duration::from_millis(ms);
        }

        if let Some(days) = parse_var::<u32, _>(&lookup, "DURASTORE_BACKUP_RETENTION_DAYS")? {
            config.backup_retention = retention_days(days);
        }

        Ok(config)
    }
}

/// Convert a retention window in days into a `Duration`.
pub fn retention_days(days: u32) -> Duration {
    Duration::from_secs(u64::from(days) * 24 * 60 * 60)
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        None => Ok(None),
    }
}
