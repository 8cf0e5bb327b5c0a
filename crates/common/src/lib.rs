//! Modular common utilities shared across TallySync crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification, clocks, backoff policy
//! - `runtime`: async infrastructure (typed pub/sub bus)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod sync;
#[cfg(feature = "foundation")]
pub mod time;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod pubsub;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use pubsub::{EventBus, Subscription, SubscriptionId};
#[cfg(feature = "foundation")]
pub use sync::retry::{Backoff, BackoffPolicy};
#[cfg(feature = "foundation")]
pub use time::{Clock, MockClock, SystemClock};
