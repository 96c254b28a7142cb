//! Exponential backoff schedule used between reconnection attempts.

use std::time::Duration;

/// Parameters of the reconnect schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnection attempt.
    pub first: Duration,
    /// Factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Upper bound for the delay.
    pub maximum: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(2_000),
            multiplier: 1.4,
            maximum: Duration::from_millis(15_000),
        }
    }
}

/// Tracks the delay to apply before the next reconnection attempt.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    policy: BackoffPolicy,
    next_ms: u64,
}

impl ReconnectBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            next_ms: millis(policy.first),
            policy,
        }
    }

    /// Delay that the next call to [`advance`](Self::advance) will return.
    pub fn peek(&self) -> Duration {
        Duration::from_millis(self.next_ms)
    }

    /// Return the delay for the attempt being scheduled and grow the interval
    /// for the one after it. Growth is capped at the policy maximum and
    /// truncated to whole milliseconds.
    pub fn advance(&mut self) -> Duration {
        let current = self.next_ms;
        let grown = scale(current, self.policy.multiplier).min(millis(self.policy.maximum) as f64);
        self.next_ms = grown as u64;
        Duration::from_millis(current)
    }

    /// Restore the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.next_ms = millis(self.policy.first);
    }
}

/// Multiply `ms` by `factor`, rounding away binary representation error
/// (2800 * 1.4 must give 3920, not 3919.9999999999995) before the caller
/// truncates.
fn scale(ms: u64, factor: f64) -> f64 {
    const PRECISION: f64 = 1e6;
    (ms as f64 * factor * PRECISION).round() / PRECISION
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
