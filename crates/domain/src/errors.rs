//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MAX_ERROR_MESSAGE_LEN;

/// Main error type for TallySync
///
/// Variants carry rendered messages rather than source errors so the type
/// stays `Clone` (coalesced refreshes hand the same result to every waiter)
/// and serializable for the command surface.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum TallySyncError {
    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rejected by remote: {0}")]
    ValidationRejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TallySyncError {
    /// Failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::ConnectionLost(_))
    }

    /// Failures that dead-letter an operation.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::ValidationRejected(_))
    }
}

/// Result type alias for TallySync operations
pub type Result<T> = std::result::Result<T, TallySyncError>;

/// Cut a failure message to [`MAX_ERROR_MESSAGE_LEN`] bytes before it is
/// stored on an operation. Truncated messages end in `...`.
pub fn truncate_error_message(error: &str) -> String {
    if error.len() <= MAX_ERROR_MESSAGE_LEN {
        return error.to_owned();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &error[..end])
}
