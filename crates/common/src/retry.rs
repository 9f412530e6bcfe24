//! Exponential backoff for retrying transient failures.
//!
//! Delays double from the base delay up to the cap: 1s, 2s, 4s, ..., 30s
//! with the defaults.

use std::time::Duration;

/// Initial backoff delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Maximum backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a policy with the given base delay and cap.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.min(20);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
