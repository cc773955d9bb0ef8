use std::time::Duration;

use rand::Rng;

use crate::settings::AuctionSettings;

/// Bounded exponential backoff with optional jitter and `Retry-After` support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
    pub max_retry_after: Duration,
    pub total_budget: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &AuctionSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base: Duration::from_millis(settings.backoff_base_ms),
            cap: Duration::from_millis(settings.backoff_cap_ms),
            jitter: Duration::from_millis(settings.backoff_jitter_ms),
            max_retry_after: Duration::from_millis(settings.max_retry_after_ms),
            total_budget: Duration::from_millis(settings.total_budget_ms),
        }
    }

    /// Delay after the `failed_attempt`-th failure (1-based): `base * 2^(n-1)`,
    /// capped, plus up to `jitter`.
    #[must_use]
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1 << exponent).min(self.cap);
        if self.jitter.is_zero() {
            return delay;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Delay before the next attempt, honoring a server `Retry-After` up to
    /// `max_retry_after`.
    #[must_use]
    pub fn next_delay(&self, failed_attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff(failed_attempt);
        match retry_after {
            Some(requested) => backoff.max(requested.min(self.max_retry_after)),
            None => backoff,
        }
    }

    /// Whether another attempt fits after `elapsed` plus `delay`. Some budget
    /// must remain once the delay is over.
    #[must_use]
    pub fn fits_budget(&self, elapsed: Duration, delay: Duration) -> bool {
        elapsed.saturating_add(delay) < self.total_budget
    }

    /// Budget left after `elapsed`; zero once it is spent.
    #[must_use]
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.total_budget.saturating_sub(elapsed)
    }
}
