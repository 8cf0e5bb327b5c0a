// Retry module with capped exponential backoff and jitter

pub mod backoff;
pub mod constants;

pub use backoff::{Backoff, BackoffPolicy};
