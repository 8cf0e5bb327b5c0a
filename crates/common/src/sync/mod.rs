//! Synchronization primitives for reliable delivery
//!
//! ## Submodules
//!
//! - **`retry`**: exponential backoff policy with a hard cap and jitter, shared
//!   by the sync engine (commit retries) and the realtime channel (reconnects)

pub mod retry;

pub use retry::{Backoff, BackoffPolicy};
