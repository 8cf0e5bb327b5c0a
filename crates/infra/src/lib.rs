//! # TallySync Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - SQLite persistence for the operation queue and the cache
//! - The HTTP adapter for the remote commit and read APIs
//! - The WebSocket realtime transport
//! - The configuration loader
//!
//! ## Architecture
//! - Implements traits defined in `tallysync-core`
//! - Depends on `tallysync-domain` and `tallysync-core`
//! - Contains all "impure" code (disk, network)

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod realtime;

// Re-export commonly used items
pub use database::*;
pub use errors::InfraError;
pub use http::*;
pub use realtime::*;
