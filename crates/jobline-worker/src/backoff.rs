//! Reconnect delays with exponential backoff.

use std::time::Duration;

/// Reconnect backoff: `base * 2^attempt`, capped at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            ceiling: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self { base, ceiling }
    }

    /// Delay to wait after the failed attempt number `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.base, self.ceiling, attempt)
    }
}

/// Pure backoff function: `base * 2^attempt`, capped at `ceiling`.
pub fn backoff_delay(base: Duration, ceiling: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt.min(31));
    base.saturating_mul(multiplier).min(ceiling)
}
