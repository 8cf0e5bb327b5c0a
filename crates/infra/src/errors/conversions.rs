//! Conversions from external infrastructure errors into domain errors.

use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use tallysync_domain::TallySyncError;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub TallySyncError);

impl From<InfraError> for TallySyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<TallySyncError> for InfraError {
    fn from(value: TallySyncError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoTallySyncError {
    fn into_tallysync(self) -> TallySyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → TallySyncError */
/* -------------------------------------------------------------------------- */

impl IntoTallySyncError for SqlError {
    fn into_tallysync(self) -> TallySyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DiskFull, _) => {
                        TallySyncError::StorageFull("database or disk is full".into())
                    }
                    (ErrorCode::DatabaseBusy, _) => {
                        TallySyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        TallySyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067) => {
                        TallySyncError::Database(format!("unique constraint violation: {message}"))
                    }
                    _ => TallySyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => TallySyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                TallySyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                TallySyncError::Database(format!("invalid column type: {ty}"))
            }
            RE::InvalidPath(path) => TallySyncError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => TallySyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_tallysync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → TallySyncError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(TallySyncError::Database(format!("connection pool: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → TallySyncError */
/* -------------------------------------------------------------------------- */

impl IntoTallySyncError for HttpError {
    fn into_tallysync(self) -> TallySyncError {
        if self.is_timeout() {
            return TallySyncError::Timeout("HTTP request timed out".into());
        }

        if self.is_connect() {
            return TallySyncError::Network("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                404 => TallySyncError::NotFound(message),
                408 | 429 | 500..=599 => TallySyncError::Network(message),
                400..=499 => TallySyncError::ValidationRejected(message),
                _ => TallySyncError::Network(message),
            };
        }

        if self.is_builder() {
            return TallySyncError::Config(format!("invalid HTTP request: {self}"));
        }

        TallySyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_tallysync())
    }
}

/* -------------------------------------------------------------------------- */
/* tungstenite::Error → TallySyncError */
/* -------------------------------------------------------------------------- */

impl IntoTallySyncError for WsError {
    fn into_tallysync(self) -> TallySyncError {
        match self {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TallySyncError::ConnectionLost("websocket closed".into())
            }
            WsError::Io(err) => TallySyncError::ConnectionLost(format!("websocket I/O: {err}")),
            WsError::Url(err) => TallySyncError::Config(format!("invalid realtime URL: {err}")),
            WsError::Http(response) => TallySyncError::ConnectionLost(format!(
                "websocket upgrade rejected with HTTP {}",
                response.status()
            )),
            WsError::Protocol(err) => TallySyncError::Protocol(err.to_string()),
            other => TallySyncError::ConnectionLost(other.to_string()),
        }
    }
}

impl From<WsError> for InfraError {
    fn from(value: WsError) -> Self {
        InfraError(value.into_tallysync())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → TallySyncError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(TallySyncError::Database(format!("invalid stored JSON: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
