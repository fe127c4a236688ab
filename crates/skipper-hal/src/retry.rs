//! Capped exponential backoff for retrying transient firmware failures.

use std::time::Duration;

/// Retry policy: `attempts` tries, waiting `initial · 2ⁿ` between them,
/// never longer than `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial: Duration::from_millis(250),
            ceiling: Duration::from_secs(4),
        }
    }
}

impl Backoff {
    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.ceiling)
    }

    /// Never fewer than one attempt.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}
