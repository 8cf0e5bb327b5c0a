//! SQLite persistence for the operation queue and the cache

pub mod cache_repository;
pub mod manager;
pub mod operation_queue;

pub use cache_repository::SqliteCacheRepository;
pub use manager::{DbManager, SqliteConnection, SqlitePool};
pub use operation_queue::SqliteOperationQueue;
