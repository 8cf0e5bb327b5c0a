//! Configuration structures
//!
//! Every field has a default so partial JSON/TOML files and sparse environment
//! overrides are valid. Durations are stored as milliseconds and exposed
//! through `Duration` accessors.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKOFF_JITTER, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_TTL_MS,
    DEFAULT_COMMIT_TIMEOUT_MS, DEFAULT_DATABASE_PATH, DEFAULT_HANDSHAKE_TIMEOUT_MS,
    DEFAULT_LOG_LEVEL, DEFAULT_MALFORMED_THRESHOLD, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POOL_SIZE,
    DEFAULT_REALTIME_TOPIC, DEFAULT_REALTIME_URL, DEFAULT_RECONNECT_BASE_DELAY_MS,
    DEFAULT_RECONNECT_MAX_DELAY_MS, DEFAULT_REFRESH_DEBOUNCE_MS, DEFAULT_REMOTE_BASE_URL,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_STALE_RETENTION_MS, DEFAULT_SWEEP_INTERVAL_MS,
    DEFAULT_SYNC_BASE_DELAY_MS, DEFAULT_SYNC_MAX_DELAY_MS,
};
use crate::errors::{Result, TallySyncError};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub realtime: RealtimeConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(invalid("database.pool_size must be greater than zero"));
        }
        if self.sync.batch_size == 0 {
            return Err(invalid("sync.batch_size must be greater than zero"));
        }
        if self.sync.max_attempts == Some(0) {
            return Err(invalid("sync.max_attempts must be greater than zero when set"));
        }
        if self.sync.max_pending == Some(0) {
            return Err(invalid("sync.max_pending must be greater than zero when set"));
        }
        self.sync.backoff.validate("sync.backoff")?;
        self.realtime.backoff.validate("realtime.backoff")?;
        if self.realtime.topic.trim().is_empty() {
            return Err(invalid("realtime.topic must not be empty"));
        }
        if self.realtime.malformed_threshold == 0 {
            return Err(invalid("realtime.malformed_threshold must be greater than zero"));
        }
        if self.cache.default_ttl_ms == 0 {
            return Err(invalid("cache.default_ttl_ms must be greater than zero"));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(invalid("remote.base_url must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> TallySyncError {
    TallySyncError::Config(message.to_owned())
}

/// SQLite database location and pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from(DEFAULT_DATABASE_PATH), pool_size: DEFAULT_POOL_SIZE }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// 0.0 disables jitter, 1.0 spreads delays by ±50%.
    pub jitter: f64,
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(TallySyncError::Config(format!(
                "{section}: base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(TallySyncError::Config(format!(
                "{section}: multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(TallySyncError::Config(format!(
                "{section}: jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_SYNC_BASE_DELAY_MS,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: DEFAULT_SYNC_MAX_DELAY_MS,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

/// Sync engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub batch_size: usize,
    /// Periodic drain trigger.
    pub poll_interval_ms: u64,
    pub commit_timeout_ms: u64,
    /// Dead-letter an op after this many transient failures. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Queue capacity; `enqueue` fails with `StorageFull` beyond it.
    pub max_pending: Option<usize>,
    pub backoff: BackoffConfig,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            commit_timeout_ms: DEFAULT_COMMIT_TIMEOUT_MS,
            max_attempts: None,
            max_pending: None,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Cache store and reconciler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    /// How long a stale entry is kept as fallback before the sweeper drops it.
    pub stale_retention_ms: u64,
    pub sweep_interval_ms: u64,
    /// Window in which notification-triggered refreshes of one key merge.
    pub refresh_debounce_ms: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_millis(self.stale_retention_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_CACHE_TTL_MS,
            stale_retention_ms: DEFAULT_STALE_RETENTION_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            refresh_debounce_ms: DEFAULT_REFRESH_DEBOUNCE_MS,
        }
    }
}

/// Realtime push channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub enabled: bool,
    pub url: String,
    pub topic: String,
    pub handshake_timeout_ms: u64,
    /// Consecutive undecodable frames that force a reconnect.
    pub malformed_threshold: u32,
    pub backoff: BackoffConfig,
}

impl RealtimeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_REALTIME_URL.to_owned(),
            topic: DEFAULT_REALTIME_TOPIC.to_owned(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            malformed_threshold: DEFAULT_MALFORMED_THRESHOLD,
            backoff: BackoffConfig {
                base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
                max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
                ..BackoffConfig::default()
            },
        }
    }
}

/// Remote commit/read API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Attached as `Authorization: Bearer` when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_BASE_URL.to_owned(),
            bearer_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: DEFAULT_LOG_LEVEL.to_owned(), json: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"sync": {"batch_size": 5}, "realtime": {"topic": "t"}}"#)
                .unwrap();
        assert_eq!(config.sync.batch_size, 5);
        assert_eq!(config.sync.commit_timeout_ms, DEFAULT_COMMIT_TIMEOUT_MS);
        assert_eq!(config.realtime.topic, "t");
        assert_eq!(config.realtime.backoff.base_delay_ms, DEFAULT_RECONNECT_BASE_DELAY_MS);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = Config::default();
        config.sync.batch_size = 0;
        assert!(matches!(config.validate(), Err(TallySyncError::Config(_))));
    }

    #[test]
    fn rejects_base_delay_above_cap() {
        let mut config = Config::default();
        config.realtime.backoff.base_delay_ms = 90_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("realtime.backoff"));
    }

    #[test]
    fn rejects_blank_topic() {
        let mut config = Config::default();
        config.realtime.topic = "  ".into();
        assert!(config.validate().is_err());
    }
}
