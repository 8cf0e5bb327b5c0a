// Constants for retry module
use std::time::Duration;

/// Default base delay for exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default maximum delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default growth factor between consecutive attempts
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default jitter factor (0.0 = no jitter, 1.0 = ±50% of the nominal delay)
pub const DEFAULT_JITTER_FACTOR: f64 = 0.3;

/// Maximum exponent for exponential backoff calculation to prevent overflow
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Smallest multiplier accepted by the policy
pub const MIN_MULTIPLIER: f64 = 1.0;
