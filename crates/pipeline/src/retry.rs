//! Bounded exponential-backoff policy.
//!
//! [`RetryPolicy`] is configuration plus two pure functions: the delay before
//! the next attempt and the predicate over [`FailureKind`]. The loop that
//! applies it lives with the executors, which own the async runtime.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::FailureKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter applied to each delay, in `[0.0, 1.0]`.
    pub jitter_fraction: f64,
    pub retryable_error_kinds: BTreeSet<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.2,
            retryable_error_kinds: [
                FailureKind::RateLimited,
                FailureKind::Timeout,
                FailureKind::ServerError,
                FailureKind::InvalidOutput,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_fraction: 0.0,
            ..Self::default()
        }
    }

    /// Attempt budget, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable_error_kinds.contains(&kind)
    }

    /// Un-jittered delay after the failed attempt with zero-based index `attempt`:
    /// `min(max_delay, base_delay * 2^attempt)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay; `sample` is drawn uniformly from `[-1.0, 1.0]`.
    ///
    /// `hint` (e.g. a server `Retry-After`) raises the delay to at least the
    /// hinted value; the result never exceeds `max_delay`.
    pub fn delay(&self, attempt: u32, sample: f64, hint: Option<Duration>) -> Duration {
        let jitter = self.jitter_fraction.clamp(0.0, 1.0) * sample.clamp(-1.0, 1.0);
        let jittered = self.backoff(attempt).mul_f64(1.0 + jitter);
        hint.map_or(jittered, |h| jittered.max(h)).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_fraction: 0.5,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let p = policy();
        let delays: Vec<_> = (0..6).map(|a| p.backoff(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(p.backoff(64), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_its_fraction() {
        let p = policy();
        assert_eq!(p.delay(1, -1.0, None), Duration::from_millis(100));
        assert_eq!(p.delay(1, 0.0, None), Duration::from_millis(200));
        assert_eq!(p.delay(1, 1.0, None), Duration::from_millis(300));
        // Jitter cannot push past the cap.
        assert_eq!(p.delay(4, 1.0, None), Duration::from_secs(1));
    }

    #[test]
    fn server_hint_raises_but_never_exceeds_cap() {
        let p = policy();
        assert_eq!(
            p.delay(0, 0.0, Some(Duration::from_millis(700))),
            Duration::from_millis(700)
        );
        assert_eq!(p.delay(0, 0.0, Some(Duration::from_secs(60))), Duration::from_secs(1));
        assert_eq!(p.delay(0, 0.0, Some(Duration::MAX)), Duration::from_secs(1));
    }

    #[test]
    fn bad_request_is_not_retryable_by_default() {
        let p = RetryPolicy::default();
        assert!(p.is_retryable(FailureKind::Timeout));
        assert!(p.is_retryable(FailureKind::InvalidOutput));
        assert!(!p.is_retryable(FailureKind::BadRequest));
    }

    #[test]
    fn zero_attempts_still_means_one() {
        assert_eq!(RetryPolicy::immediate(0).attempts(), 1);
    }
}
