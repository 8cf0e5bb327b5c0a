//! Durable local queue of unsynced mutations
//!
//! The port lives in [`ports`]; the SQLite adapter is in `tallysync-infra`.

pub mod memory;
pub mod ports;

pub use memory::InMemoryOperationQueue;
pub use ports::OperationQueue;
