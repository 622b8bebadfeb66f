//! Backoff delay computation

use rand::Rng;
use std::time::Duration;

/// Jitter is drawn from this fraction range of the exponential term
pub const JITTER_MIN: f64 = 0.1;
pub const JITTER_MAX: f64 = 0.3;

/// Largest exponent applied to the base delay; the cap takes over long before
const MAX_EXPONENT: u32 = 30;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX);
        self.delay_with_jitter(attempt, retry_after, jitter)
    }

    /// Deterministic core of [`delay_for`](Self::delay_for)
    pub fn delay_with_jitter(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        jitter_fraction: f64,
    ) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_delay);
        }

        let exponent = attempt.min(MAX_EXPONENT) as i32;
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let delay = exponential + exponential * jitter_fraction;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}
