// Capped exponential backoff with jitter
use std::time::Duration;

use rand::Rng;

use crate::error::{CommonError, CommonResult};
use crate::sync::retry::constants::{
    DEFAULT_BASE_DELAY, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_DELAY, DEFAULT_MULTIPLIER,
    MAX_BACKOFF_EXPONENT, MIN_MULTIPLIER,
};

/// Exponential backoff policy: `base * multiplier^attempt`, capped at
/// `max_delay`, with symmetric jitter applied around the nominal delay.
///
/// The nominal schedule ([`BackoffPolicy::nominal_delay`]) is monotonically
/// non-decreasing in `attempt`. The jittered delay ([`BackoffPolicy::delay`])
/// is never larger than `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validated policy in one call.
    pub fn custom(
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> CommonResult<Self> {
        Self::validate(base_delay, multiplier, max_delay)?;
        Ok(Self { base_delay, max_delay, multiplier, jitter_factor: jitter_factor.clamp(0.0, 1.0) })
    }

    fn validate(base_delay: Duration, multiplier: f64, max_delay: Duration) -> CommonResult<()> {
        if base_delay > max_delay {
            return Err(CommonError::config(format!(
                "base_delay ({base_delay:?}) cannot be greater than max_delay ({max_delay:?})"
            )));
        }
        if !multiplier.is_finite() || multiplier < MIN_MULTIPLIER {
            return Err(CommonError::config(format!(
                "multiplier must be a finite value >= {MIN_MULTIPLIER}, got {multiplier}"
            )));
        }
        Ok(())
    }

    /// Set the base delay for exponential backoff
    pub fn with_base_delay(mut self, delay: Duration) -> CommonResult<Self> {
        Self::validate(delay, self.multiplier, self.max_delay)?;
        self.base_delay = delay;
        Ok(self)
    }

    /// Set the maximum delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> CommonResult<Self> {
        Self::validate(self.base_delay, self.multiplier, delay)?;
        self.max_delay = delay;
        Ok(self)
    }

    /// Set the multiplicative growth factor
    pub fn with_multiplier(mut self, multiplier: f64) -> CommonResult<Self> {
        Self::validate(self.base_delay, multiplier, self.max_delay)?;
        self.multiplier = multiplier;
        Ok(self)
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = ±50% of nominal)
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    /// Delay before retry number `attempt` (0-based) without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let base_millis = self.base_delay.as_millis() as f64;
        let max_millis = self.max_delay.as_millis() as f64;

        // Cap exponent to prevent overflow
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
        let factor = self.multiplier.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let delay_millis = (base_millis * factor).min(max_millis);

        Duration::from_millis(delay_millis as u64)
    }

    /// Delay before retry number `attempt` (0-based) with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        self.apply_jitter(nominal).min(self.max_delay)
    }

    /// Apply jitter to avoid synchronized retries across clients
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let delay_millis = delay.as_millis() as f64;
        let jitter_range = delay_millis * self.jitter_factor;

        // Random jitter in -jitter_range/2 ..= +jitter_range/2
        let jitter = rng.gen_range(-jitter_range / 2.0..=jitter_range / 2.0);
        let final_millis = (delay_millis + jitter).max(0.0) as u64;

        Duration::from_millis(final_millis)
    }
}

/// Stateful counter over a [`BackoffPolicy`] for consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record a failure and return how long to wait before the next try.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget previous failures after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
