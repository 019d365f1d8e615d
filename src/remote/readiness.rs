use std::time::Duration;

use crate::constants::{READINESS_BASE_DELAY_MS, READINESS_MAX_ATTEMPTS, READINESS_MAX_DELAY_SECS};

/// Bounded exponential backoff for readiness polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: READINESS_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(READINESS_BASE_DELAY_MS),
            max_delay: Duration::from_secs(READINESS_MAX_DELAY_SECS),
        }
    }
}

impl ReadinessPolicy {
    /// Delay after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        std::cmp::min(self.base_delay.saturating_mul(1u32 << exponent), self.max_delay)
    }

    /// Worst-case time spent sleeping before giving up
    pub fn total_wait(&self) -> Duration {
        (1..self.max_attempts.max(1)).map(|a| self.delay_for(a)).sum()
    }
}
