//! Time utilities and abstractions
//!
//! - **[`clock`]**: Real and mock clocks so freshness checks can be driven
//!   deterministically in tests
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tallysync_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let before = clock.millis_since_epoch();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.millis_since_epoch() - before, 5_000);
//! ```

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
