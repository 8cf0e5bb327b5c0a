use std::time::Duration;

use tallysync_domain::{LoggingConfig, TallySyncError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
///
/// Fails if a subscriber is already installed or the filter does not parse.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TallySyncError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            TallySyncError::Config(format!("invalid log level {:?}: {e}", config.level))
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json { builder.json().try_init() } else { builder.try_init() };
    installed.map_err(|e| TallySyncError::Internal(format!("failed to install tracing subscriber: {e}")))
}

/// Log the outcome of a command execution with structured fields.
///
/// `command` should be a stable identifier such as `"mutations::submit_mutation"`
/// and must not carry payload data.
#[inline]
pub fn log_command_execution(
    command: &str,
    elapsed: Duration,
    success: bool,
    error_type: Option<&'static str>,
) {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    if success {
        info!(command, duration_ms, "command_execution_success");
    } else {
        warn!(command, duration_ms, error_type, "command_execution_failure");
    }
}

/// Convert a `TallySyncError` into a stable label suitable for logging.
#[inline]
pub fn error_label(error: &TallySyncError) -> &'static str {
    match error {
        TallySyncError::StorageFull(_) => "storage_full",
        TallySyncError::Network(_) => "network",
        TallySyncError::Timeout(_) => "timeout",
        TallySyncError::ValidationRejected(_) => "validation_rejected",
        TallySyncError::Protocol(_) => "protocol",
        TallySyncError::ConnectionLost(_) => "connection_lost",
        TallySyncError::Database(_) => "database",
        TallySyncError::Config(_) => "config",
        TallySyncError::NotFound(_) => "not_found",
        TallySyncError::InvalidInput(_) => "invalid_input",
        TallySyncError::ShuttingDown => "shutting_down",
        TallySyncError::Internal(_) => "internal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(error_label(&TallySyncError::StorageFull("disk".into())), "storage_full");
        assert_eq!(error_label(&TallySyncError::ShuttingDown), "shutting_down");
        assert_eq!(error_label(&TallySyncError::ValidationRejected("x".into())), "validation_rejected");
    }
}
