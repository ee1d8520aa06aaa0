//! # Retry Policy
//!
//! Exponential backoff with jitter for transient issuance failures.
//!
//! ## Schedule (defaults: base 2 s, cap 5 min, jitter 0.5)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt │ nominal delay │ jittered range                               │
//! │  ────────┼───────────────┼────────────────────                          │
//! │     1    │      2 s      │   1 s ..   3 s                               │
//! │     2    │      4 s      │   2 s ..   6 s                               │
//! │     3    │      8 s      │   4 s ..  12 s                               │
//! │     4    │     16 s      │   8 s ..  24 s                               │
//! │    ...   │               │                                              │
//! │     n    │  min(2^n s, 5 min), never above the cap                      │
//! │                                                                         │
//! │  After max_attempts (default 5) the queue fails the job instead.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

/// Doublings past this point are always capped.
const MAX_DOUBLINGS: u32 = 32;

/// When and how often a transient failure is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempt budget per job, first attempt included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomization factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut backoff = self.backoff();
        let mut delay = self.base_delay;
        for _ in 0..attempt.clamp(1, MAX_DOUBLINGS) {
            if let Some(next) = backoff.next_backoff() {
                delay = next;
            }
        }
        delay.min(self.max_delay)
    }

    /// Inclusive range `delay_for(attempt)` falls in.
    pub fn bounds(&self, attempt: u32) -> (Duration, Duration) {
        let exponent = attempt.clamp(1, MAX_DOUBLINGS) - 1;
        let nominal = self
            .base_delay
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        let low = nominal.mul_f64(1.0 - self.jitter);
        let high = nominal.mul_f64(1.0 + self.jitter).min(self.max_delay);
        (low.min(high), high)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: self.jitter,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None, // the attempt budget bounds retries
            ..Default::default()
        }
    }
}
