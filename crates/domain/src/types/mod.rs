//! Domain types and models

pub mod cache;
pub mod operation;
pub mod realtime;
pub mod status;

pub use cache::{CacheEntry, CacheKey};
pub use operation::{
    CommittedRecord, IdempotencyToken, NewOperation, OperationId, OperationKind, PendingOperation,
};
pub use realtime::{ConnectionState, ConnectionStatus, NotificationEvent, NotificationKind};
pub use status::SyncStatus;
