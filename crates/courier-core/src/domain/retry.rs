//! Backoff policy for transport errors.

use std::time::Duration;

/// Capped exponential backoff.
///
/// `delay = min(base_delay * multiplier^(attempts - 1), max_delay)`
///
/// With base=100ms, multiplier=2.0, max=5s:
/// - attempt 1: 100ms
/// - attempt 2: 200ms
/// - attempt 3: 400ms
/// - ...
/// - attempt 7 and later: 5s
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first consecutive failure.
    pub base_delay: Duration,

    /// Growth factor per consecutive failure.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Delay before the next attempt, given how many consecutive attempts
    /// have already failed (1-indexed). `attempts == 0` yields `base_delay`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}
