//! Reconciler: keeps the cache consistent with the remote
//!
//! Notifications invalidate the cache keys bound to their kind and schedule a
//! debounced refresh. Every new realtime session invalidates everything and
//! refreshes the tracked keys, since events sent while disconnected are lost.
//! Concurrent refreshes of one key share a single remote read.

pub mod events;
pub mod ports;
pub mod service;

pub use events::ReconcilerEvent;
pub use ports::RemoteReadApi;
pub use service::{bound_keys, Binding, Reconciler, ReconcilerConfig};
