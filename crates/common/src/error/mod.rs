//! Shared error primitives.
//!
//! [`ErrorClassification`] is the common vocabulary every layer uses to decide
//! whether a failure is worth retrying and how loudly it should be reported.
//! [`CommonError`] covers the handful of failures that originate inside this
//! crate (invalid configuration of a backoff policy, a closed bus).

use std::time::Duration;

use thiserror::Error;

/// Severity levels used for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, no action required
    Info,
    /// Degraded but self-healing
    Warning,
    /// Operation failed
    Error,
    /// Integrity at risk, requires attention
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Classification contract shared by error types across the workspace.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as network timeouts or temporary service unavailability.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when the failing party suggested a delay
    /// (e.g. a `Retry-After` header), `None` otherwise.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Errors raised by the common utilities themselves.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommonError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommonError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } => ErrorSeverity::Error,
            Self::ChannelClosed(_) => ErrorSeverity::Warning,
            Self::Internal(_) => ErrorSeverity::Critical,
        }
    }
}

/// Result alias for common utilities.
pub type CommonResult<T> = Result<T, CommonError>;
