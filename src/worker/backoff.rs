//! Exponential backoff schedule for the worker's remote calls.

use std::time::Duration;

use rand::Rng;

/// Delay before the first retry.
pub const INITIAL_DELAY: Duration = Duration::from_millis(200);
/// Upper bound on the exponential delay, before jitter.
pub const MAX_DELAY: Duration = Duration::from_secs(10);
/// Upper bound on the uniform random jitter added to each delay.
pub const MAX_JITTER: Duration = Duration::from_secs(1);

/// Doubling backoff with bounded jitter. Delays follow
/// `min(base * 2^n, cap) + U(0, jitter)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_jitter: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_DELAY, MAX_DELAY, MAX_JITTER)
    }
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_jitter: Duration) -> Self {
        Self {
            base,
            cap,
            max_jitter,
            attempt: 0,
        }
    }

    /// Next delay in the schedule, advancing the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        // Shifts beyond 2^20 are far past any sane cap.
        let exponential = self
            .base
            .saturating_mul(1u32 << self.attempt.min(20))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter)
        };
        exponential + jitter
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
