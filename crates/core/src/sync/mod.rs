//! Sync engine: drains the durable queue against the remote commit API
//!
//! Success removes the operation from the queue. Transient failures halt the
//! pass and schedule a retry with capped exponential backoff. Permanent
//! rejections dead-letter the operation and block later operations of the
//! same kind until the caller skips or retries it.

pub mod engine;
pub mod events;
pub mod ports;

pub use engine::{SyncEngine, SyncEngineConfig};
pub use events::{DrainOutcome, DrainReport, DrainTrigger, SyncEvent};
pub use ports::{CommitRequest, RemoteCommitApi, RemoteError};
