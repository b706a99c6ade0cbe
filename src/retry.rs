//! Inter-attempt retry pacing with optional exponential back-off.

use std::time::Duration;

/// Controls the delay between failed attempts of one job execution.
///
/// The default is immediate retry (zero delay). Whatever the policy, a
/// waiting retry still observes scheduler shutdown — the scheduler races the
/// delay against its cancellation token.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap; never undercuts the initial
    /// delay).
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

impl RetryPolicy {
    /// Retry immediately, with no delay between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    /// The same fixed delay before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
        }
    }

    /// Exponential back-off doubling from `initial` up to `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            backoff_factor: 2.0,
        }
    }

    /// Compute the delay for the given retry number (0-indexed).
    ///
    /// The capped base delay is stretched by up to a quarter of itself so
    /// clustered failures don't retry in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let cap = self.max_delay.max(self.initial_delay);
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(32) as i32);
        let base_secs = (self.initial_delay.as_secs_f64() * factor).min(cap.as_secs_f64());
        let base = Duration::from_secs_f64(base_secs);
        base + base.mul_f64(spread_fraction(attempt) / 4.0)
    }
}

/// Deterministic fraction in [0, 1) per attempt number, from a xorshift
/// round. Not random in any strong sense; it only has to de-synchronise
/// retries across jobs that failed at the same instant.
fn spread_fraction(attempt: u32) -> f64 {
    let mut bits = u64::from(attempt) + 1;
    bits ^= bits << 13;
    bits ^= bits >> 7;
    bits ^= bits << 17;
    (bits % 1024) as f64 / 1024.0
}
