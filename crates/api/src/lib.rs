//! # TallySync App
//!
//! Application layer - command surface, wiring and entry point.
//!
//! This crate contains:
//! - Commands (dashboard UI → engine bridge)
//! - Application context (dependency injection)
//! - Logging setup
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core` and `infra`
//! - Wires the ports in `core` to the SQLite, HTTP and WebSocket adapters
//! - The only crate that installs a global tracing subscriber

pub mod commands;
pub mod context;
pub mod utils;

pub use commands::*;
pub use context::*;
pub use utils::logging::init_tracing;
