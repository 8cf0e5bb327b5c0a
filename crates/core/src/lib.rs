//! # TallySync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for the queue, cache, remote API and
//!   realtime transport
//! - The sync engine that drains the durable queue
//! - The overlay reducer behind optimistic UI state
//! - The cache store, realtime channel and reconciler
//! - In-memory adapters for tests and ephemeral sessions
//!
//! ## Architecture Principles
//! - Only depends on `tallysync-common` and `tallysync-domain`
//! - No database, HTTP, or socket code
//! - All external dependencies via traits

pub mod cache;
pub mod overlay;
pub mod queue;
pub mod realtime;
pub mod reconciler;
pub mod sync;

// Re-export specific items to avoid ambiguity
pub use cache::ports::CacheRepository;
pub use cache::{CacheLookup, CacheStore, CacheStoreConfig, InMemoryCacheRepository};
pub use overlay::{DashboardView, DisplayRecord, OverlayState, RecordStatus, SharedOverlay};
pub use queue::ports::OperationQueue;
pub use queue::InMemoryOperationQueue;
pub use realtime::ports::{RealtimeConnection, RealtimeTransport};
pub use realtime::{RealtimeChannel, RealtimeChannelConfig};
pub use reconciler::ports::RemoteReadApi;
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerEvent};
pub use sync::ports::{CommitRequest, RemoteCommitApi, RemoteError};
pub use sync::{DrainReport, DrainTrigger, SyncEngine, SyncEngineConfig, SyncEvent};
