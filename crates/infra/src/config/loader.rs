//! Configuration loader
//!
//! Builds a [`Config`] from an optional file plus environment overrides.
//!
//! ## Loading Strategy
//! 1. Probe the standard locations for a JSON or TOML file
//! 2. Start from that file, or from defaults when none exists
//! 3. Apply `TALLYSYNC_*` environment variables on top
//! 4. Validate the result
//!
//! ## Environment Variables
//! - `TALLYSYNC_DB_PATH`: Database file path
//! - `TALLYSYNC_DB_POOL_SIZE`: Connection pool size
//! - `TALLYSYNC_SYNC_ENABLED`: Whether the background drain runs (true/false)
//! - `TALLYSYNC_SYNC_BATCH_SIZE`: Operations read per drain batch
//! - `TALLYSYNC_SYNC_POLL_INTERVAL_MS`: Periodic drain interval
//! - `TALLYSYNC_SYNC_MAX_ATTEMPTS`: Transient retry budget per operation
//! - `TALLYSYNC_SYNC_MAX_PENDING`: Queue capacity
//! - `TALLYSYNC_CACHE_TTL_MS`: Default cache TTL
//! - `TALLYSYNC_CACHE_REFRESH_DEBOUNCE_MS`: Notification debounce window
//! - `TALLYSYNC_REALTIME_ENABLED`: Whether to open the push channel
//! - `TALLYSYNC_REALTIME_URL`: WebSocket endpoint
//! - `TALLYSYNC_REALTIME_TOPIC`: Subscription topic
//! - `TALLYSYNC_REMOTE_BASE_URL`: Base URL of the commit/read API
//! - `TALLYSYNC_REMOTE_TOKEN`: Bearer token for the remote API
//! - `TALLYSYNC_REMOTE_TIMEOUT_MS`: Per-request timeout
//! - `TALLYSYNC_LOG_LEVEL`: Log filter used when `RUST_LOG` is unset
//! - `TALLYSYNC_LOG_JSON`: Emit JSON log lines (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./tallysync.{json,toml}` then `./config.{json,toml}`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names next to the executable and its parents

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tallysync_domain::{Config, Result, TallySyncError};

const ENV_PREFIX: &str = "TALLYSYNC_";
const FILE_STEMS: [&str; 2] = ["tallysync", "config"];
const FILE_EXTENSIONS: [&str; 2] = ["json", "toml"];

/// Load configuration from the probed file (if any) and the environment.
///
/// # Errors
/// Returns `TallySyncError::Config` if a file or variable cannot be parsed or
/// the merged configuration is invalid.
pub fn load() -> Result<Config> {
    let mut config = match probe_config_paths() {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::debug!("No config file found, starting from defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Defaults overridden by `TALLYSYNC_*` environment variables only.
///
/// # Errors
/// Returns `TallySyncError::Config` if a variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected by
/// extension; missing fields take their defaults.
///
/// # Errors
/// Returns `TallySyncError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(TallySyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            TallySyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| TallySyncError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| TallySyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| TallySyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(TallySyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.extend(exe_dir.ancestors().take(3).map(Path::to_path_buf));
        }
    }

    candidate_paths(&roots).into_iter().find(|path| path.is_file())
}

fn candidate_paths(roots: &[PathBuf]) -> Vec<PathBuf> {
    roots
        .iter()
        .flat_map(|root| {
            FILE_STEMS.iter().flat_map(move |stem| {
                FILE_EXTENSIONS.iter().map(move |ext| root.join(format!("{stem}.{ext}")))
            })
        })
        .collect()
}

/// Apply every `TALLYSYNC_*` variable that `lookup` returns.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(path) = var("DB_PATH") {
        config.database.path = PathBuf::from(path);
    }
    override_parsed(&var, "DB_POOL_SIZE", &mut config.database.pool_size)?;

    if let Some(enabled) = var("SYNC_ENABLED") {
        config.sync.enabled = parse_bool(&enabled);
    }
    override_parsed(&var, "SYNC_BATCH_SIZE", &mut config.sync.batch_size)?;
    override_parsed(&var, "SYNC_POLL_INTERVAL_MS", &mut config.sync.poll_interval_ms)?;
    if let Some(raw) = var("SYNC_MAX_ATTEMPTS") {
        config.sync.max_attempts = Some(parse_value("SYNC_MAX_ATTEMPTS", &raw)?);
    }
    if let Some(raw) = var("SYNC_MAX_PENDING") {
        config.sync.max_pending = Some(parse_value("SYNC_MAX_PENDING", &raw)?);
    }

    override_parsed(&var, "CACHE_TTL_MS", &mut config.cache.default_ttl_ms)?;
    override_parsed(&var, "CACHE_REFRESH_DEBOUNCE_MS", &mut config.cache.refresh_debounce_ms)?;

    if let Some(enabled) = var("REALTIME_ENABLED") {
        config.realtime.enabled = parse_bool(&enabled);
    }
    if let Some(url) = var("REALTIME_URL") {
        config.realtime.url = url;
    }
    if let Some(topic) = var("REALTIME_TOPIC") {
        config.realtime.topic = topic;
    }

    if let Some(url) = var("REMOTE_BASE_URL") {
        config.remote.base_url = url;
    }
    if let Some(token) = var("REMOTE_TOKEN") {
        config.remote.bearer_token = Some(token).filter(|t| !t.trim().is_empty());
    }
    override_parsed(&var, "REMOTE_TIMEOUT_MS", &mut config.remote.request_timeout_ms)?;

    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("LOG_JSON") {
        config.logging.json = parse_bool(&json);
    }

    Ok(())
}

fn override_parsed<T, F>(var: &F, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(name) {
        *slot = parse_value(name, &raw)?;
    }
    Ok(())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| TallySyncError::Config(format!("Invalid {ENV_PREFIX}{name}: {e}")))
}

/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
