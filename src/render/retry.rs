//! Attempt limit and full-jitter backoff.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Full-jitter exponential backoff.
///
/// After failed attempt `n` (0-based) the delay is drawn uniformly from
/// `[min, min(max, min * 2^n)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullJitter {
    pub min: Duration,
    pub max: Duration,
}

impl Default for FullJitter {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_DELAY,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl FullJitter {
    /// Upper bound of the delay after failed attempt `attempt`.
    pub fn cap(&self, attempt: u32) -> Duration {
        let min_ms = millis(self.min);
        let max_ms = millis(self.max).max(min_ms);
        let exp = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(min_ms.saturating_mul(exp).min(max_ms))
    }

    /// Draw the delay to wait after failed attempt `attempt`.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let low = millis(self.min);
        let high = millis(self.cap(attempt)).max(low);
        Duration::from_millis(rng.gen_range(low..=high))
    }
}

/// How often and how patiently the renderer retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: FullJitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: FullJitter::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether another attempt may follow failed attempt `attempt` (1-based).
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
