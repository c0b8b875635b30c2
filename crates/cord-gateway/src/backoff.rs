//! Exponential backoff with full jitter for reconnection delays.
//!
//! `delay = random(0, base * 2^exp)` where `exp` grows by one per call up
//! to `max_exponent`. When the previous call is older than
//! `base * 2^(max_exponent + 1)` the connection is considered to have been
//! stable and the exponent starts over.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Exponential backoff calculator with full jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_exponent: u32,
    reset_after: Duration,
    exponent: u32,
    last_invocation: Option<Instant>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 10)
    }
}

impl Backoff {
    /// Create a new backoff calculator.
    #[must_use]
    pub fn new(base: Duration, max_exponent: u32) -> Self {
        let shift = max_exponent.saturating_add(1);
        let reset_after = base.saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        Self {
            base,
            max_exponent,
            reset_after,
            exponent: 0,
            last_invocation: None,
        }
    }

    /// Compute the next delay and advance the exponent.
    pub fn next_delay(&mut self) -> Duration {
        let now = Instant::now();
        if let Some(last) = self.last_invocation {
            if now.duration_since(last) > self.reset_after {
                self.exponent = 0;
            }
        }
        self.last_invocation = Some(now);

        self.exponent = self.exponent.saturating_add(1).min(self.max_exponent);
        let upper = self.upper_bound();
        if upper.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..=upper.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Ceiling of the next jittered delay at the current exponent
    #[must_use]
    pub fn upper_bound(&self) -> Duration {
        self.base
            .saturating_mul(1u32.checked_shl(self.exponent).unwrap_or(u32::MAX))
    }

    /// Start over after a connection that reached READY.
    pub fn reset(&mut self) {
        self.exponent = 0;
        self.last_invocation = None;
    }

    #[must_use]
    pub fn exponent(&self) -> u32 {
        self.exponent
    }
}
