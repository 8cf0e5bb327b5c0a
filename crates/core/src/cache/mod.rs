//! TTL cache of remote-read results
//!
//! Entries are served stale-while-revalidate: stale values remain readable as
//! fallback until the sweeper drops them. Persistence is optional and goes
//! through a single writer task.

pub mod memory;
pub mod ports;
pub mod store;

pub use memory::InMemoryCacheRepository;
pub use ports::CacheRepository;
pub use store::{CacheLookup, CacheStore, CacheStoreConfig};
