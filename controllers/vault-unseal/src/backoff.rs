//! # Exponential Backoff
//!
//! Provides the retry delay schedule for tasks that are not actionable yet
//! (pod still pending, Vault unreachable).
//!
//! Delays grow geometrically from `initial` and are capped at `max`.
//! With the defaults the sequence is 1s, 2s, 4s, 8s, 16s, 32s, 60s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Stateless: the delay is computed from the attempt number carried by each task,
/// so no per-pod state is kept between retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry
    initial: Duration,
    /// Upper bound on any delay
    max: Duration,
    /// Growth factor between consecutive attempts
    multiplier: f64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    ///
    /// # Arguments
    ///
    /// * `initial` - Delay before the first retry
    /// * `max` - Cap applied to every delay
    /// * `multiplier` - Growth factor; values below 1.0 are treated as 1.0
    #[must_use]
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    ///
    /// `attempt` 0 and 1 both yield `initial`. The result never exceeds `max`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let secs = self.initial.as_secs_f64() * factor;

        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }

        Duration::from_secs_f64(secs).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

/// Bounded retry policy: a backoff schedule plus a maximum attempt count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed before the task is dropped
    pub max_attempts: u32,
    /// Delay schedule
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    /// Delay before retry number `attempt`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }

    /// Whether retry number `attempt` is still allowed
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: ExponentialBackoff::default(),
        }
    }
}
