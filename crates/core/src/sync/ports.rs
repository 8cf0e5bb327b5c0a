//! Port interface for the remote commit API

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tallysync_common::error::{ErrorClassification, ErrorSeverity};
use tallysync_domain::{
    CommittedRecord, IdempotencyToken, OperationId, OperationKind, PendingOperation,
    TallySyncError,
};
use thiserror::Error;

/// Body of one commit call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Local operation id, sent so the remote can detect reordering.
    pub client_sequence: OperationId,
    pub kind: OperationKind,
    pub payload: Value,
    pub idempotency_token: IdempotencyToken,
}

impl From<&PendingOperation> for CommitRequest {
    fn from(op: &PendingOperation) -> Self {
        Self {
            client_sequence: op.id,
            kind: op.kind,
            payload: op.payload.clone(),
            idempotency_token: op.idempotency_token.clone(),
        }
    }
}

/// Failure reported by a remote API adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Remote is overloaded or temporarily failing (408, 429, 5xx).
    #[error("remote unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String, retry_after: Option<Duration> },

    /// Remote refused the request on its merits; retrying cannot help.
    #[error("rejected by remote{}: {message}", http_suffix(.status))]
    Rejected { status: Option<u16>, message: String },
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {code})")).unwrap_or_default()
}

impl RemoteError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { status: None, message: message.into() }
    }
}

impl ErrorClassification for RemoteError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Unavailable { .. } => ErrorSeverity::Warning,
            Self::Rejected { .. } => ErrorSeverity::Error,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Unavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<RemoteError> for TallySyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(message) => Self::Network(message),
            RemoteError::Timeout(message) => Self::Timeout(message),
            err @ RemoteError::Unavailable { .. } => Self::Network(err.to_string()),
            RemoteError::Rejected { message, .. } => Self::ValidationRejected(message),
        }
    }
}

/// Idempotent commit endpoint of the remote service.
///
/// Repeating a request with the same idempotency token must have at most one
/// effect; the client delivers at least once.
#[async_trait]
pub trait RemoteCommitApi: Send + Sync {
    async fn commit(&self, request: &CommitRequest) -> Result<CommittedRecord, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejections_are_final() {
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(RemoteError::Timeout("10s".into()).is_retryable());
        assert!(RemoteError::Unavailable { status: 503, message: String::new(), retry_after: None }
            .is_retryable());
        assert!(!RemoteError::rejected("amount must be positive").is_retryable());
    }

    #[test]
    fn retry_after_comes_from_unavailable() {
        let err = RemoteError::Unavailable {
            status: 429,
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn converts_into_domain_taxonomy() {
        let err: TallySyncError = RemoteError::rejected("bad vehicle number").into();
        assert_eq!(err, TallySyncError::ValidationRejected("bad vehicle number".into()));
        let err: TallySyncError = RemoteError::Timeout("commit".into()).into();
        assert!(err.is_transient());
    }

    #[test]
    fn rejection_message_includes_status_when_known() {
        let err = RemoteError::Rejected { status: Some(422), message: "invalid".into() };
        assert_eq!(err.to_string(), "rejected by remote (HTTP 422): invalid");
        assert_eq!(RemoteError::rejected("invalid").to_string(), "rejected by remote: invalid");
    }
}
