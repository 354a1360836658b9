//! Retry policy and backoff
//!
//! Each action carries its own policy: how many extra attempts it gets,
//! which status codes count as transient, and how the delay between
//! attempts grows.

use std::time::Duration;

/// HTTP status codes retried by default
pub const DEFAULT_RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Default delay before the first retry
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default multiplier applied to the delay on each further retry
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default ceiling on any single backoff delay
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Maximum additional attempts for one action.
///
/// `Limited(0)` means never retry. `Unlimited` retries without bound; the
/// attempt counter still increments but is never compared against a
/// ceiling. Unlimited is only safe against services guaranteed to
/// eventually return a non-retryable status — that is the caller's
/// responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Limited(u32),
    Unlimited,
}

impl RetryLimit {
    /// Parse the conventional integer encoding: -1 = unlimited, 0 = none,
    /// N = N extra attempts.
    pub fn from_i64(raw: i64) -> Self {
        if raw < 0 {
            RetryLimit::Unlimited
        } else {
            RetryLimit::Limited(raw as u32)
        }
    }

    /// Retries left after `used` have been consumed, for logging
    pub fn remaining(&self, used: u32) -> RetryBudget {
        match self {
            RetryLimit::Unlimited => RetryBudget::Unlimited,
            RetryLimit::Limited(limit) => RetryBudget::Left(limit.saturating_sub(used)),
        }
    }
}

/// Remaining retry budget, printable in log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Left(u32),
    Unlimited,
}

impl std::fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryBudget::Left(n) => write!(f, "{n}"),
            RetryBudget::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Per-action retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub limit: RetryLimit,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    /// Ceiling on any single delay, so unlimited budgets stay bounded
    pub max_backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: RetryLimit::Limited(0),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_backoff: DEFAULT_MAX_BACKOFF,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Policy with `limit` extra attempts and defaults for everything else
    pub fn limited(limit: u32) -> Self {
        Self {
            limit: RetryLimit::Limited(limit),
            ..Default::default()
        }
    }

    /// Policy that retries without bound
    pub fn unlimited() -> Self {
        Self {
            limit: RetryLimit::Unlimited,
            ..Default::default()
        }
    }

    /// Set the delay before the first retry
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Set the multiplier applied on each further retry
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the ceiling on any single backoff delay
    pub fn with_max_backoff(mut self, ceiling: Duration) -> Self {
        self.max_backoff = ceiling;
        self
    }

    /// Replace the set of retryable status codes
    pub fn with_retry_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retry_statuses = statuses;
        self
    }

    /// Whether another retry fits in the budget, given the number of
    /// retries already performed.
    pub fn allows(&self, retry_count: u32) -> bool {
        match self.limit {
            RetryLimit::Unlimited => true,
            RetryLimit::Limited(limit) => retry_count < limit,
        }
    }

    /// Whether `status` counts as a transient server failure
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay before retry number `retry_count` (1-based):
    /// initial_backoff * factor^(retry_count - 1), clamped to
    /// `max_backoff`. The clamp keeps the arithmetic finite under an
    /// unlimited budget, so this never panics.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        if retry_count <= 1 {
            return self.initial_backoff.min(self.max_backoff);
        }
        let exponent = (retry_count - 1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_factor.powi(exponent);
        let seconds = self.initial_backoff.as_secs_f64() * factor;
        if !seconds.is_finite() || seconds >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_budget_is_bounded() {
        let policy = RetryPolicy::limited(2);
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn limited_zero_never_retries() {
        let policy = RetryPolicy::limited(0);
        assert!(!policy.allows(0));
    }

    #[test]
    fn unlimited_always_allows() {
        let policy = RetryPolicy::unlimited();
        assert!(policy.allows(0));
        assert!(policy.allows(10_000));
    }

    #[test]
    fn from_i64_sentinel() {
        assert_eq!(RetryLimit::from_i64(-1), RetryLimit::Unlimited);
        assert_eq!(RetryLimit::from_i64(0), RetryLimit::Limited(0));
        assert_eq!(RetryLimit::from_i64(5), RetryLimit::Limited(5));
    }

    #[test]
    fn default_retryable_statuses() {
        let policy = RetryPolicy::default();
        for status in [500, 502, 503, 504] {
            assert!(policy.is_retryable_status(status));
        }
        for status in [200, 404, 429] {
            assert!(!policy.is_retryable_status(status));
        }
    }

    #[test]
    fn backoff_grows_multiplicatively() {
        let policy = RetryPolicy::limited(5)
            .with_initial_backoff(Duration::from_millis(100))
            .with_backoff_factor(2.0);

        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let policy = RetryPolicy::unlimited()
            .with_initial_backoff(Duration::from_millis(100))
            .with_backoff_factor(2.0)
            .with_max_backoff(Duration::from_secs(5));

        assert_eq!(policy.backoff_delay(6), Duration::from_millis(3200));
        assert_eq!(policy.backoff_delay(7), Duration::from_secs(5));
        // Deep retry counts overflow the f64 math; the cap still holds
        assert_eq!(policy.backoff_delay(10_000), Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn degenerate_factor_falls_back_to_cap() {
        let policy = RetryPolicy::unlimited()
            .with_initial_backoff(Duration::from_millis(100))
            .with_backoff_factor(f64::INFINITY)
            .with_max_backoff(Duration::from_secs(5));

        assert_eq!(policy.backoff_delay(2), Duration::from_secs(5));
    }

    #[test]
    fn initial_backoff_above_cap_is_clamped() {
        let policy = RetryPolicy::limited(3)
            .with_initial_backoff(Duration::from_secs(120))
            .with_max_backoff(Duration::from_secs(5));

        assert_eq!(policy.backoff_delay(1), Duration::from_secs(5));
    }
}
