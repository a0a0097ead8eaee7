//! The retry loop: bounded exponential backoff around breaker-guarded attempts.
//!
//! The breaker is consulted before **every** attempt, and again before each
//! backoff sleep, so a breaker that opens mid-retry (because other projects'
//! calls are failing too) aborts the outstanding retries immediately.

use std::future::Future;
use std::time::Duration;

use pipeline::{CircuitBreaker, FailureKind, InferenceError, Retryability, RetryPolicy};
use rand::Rng;
use thiserror::Error;

/// What the retry loop needs to know about a failed attempt.
pub trait AttemptError: std::fmt::Display {
    fn kind(&self) -> FailureKind;

    /// Server-provided minimum delay before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Whether the failure counts against the circuit breaker.
    fn indicates_unhealthy(&self) -> bool;

    /// A failure that must not be retried whatever the policy says.
    fn is_final(&self) -> bool {
        false
    }
}

impl AttemptError for InferenceError {
    fn kind(&self) -> FailureKind {
        InferenceError::kind(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self.retryability() {
            Retryability::Retryable { after } => after,
            Retryability::NonRetryable => None,
        }
    }

    fn indicates_unhealthy(&self) -> bool {
        InferenceError::indicates_unhealthy(self)
    }

    fn is_final(&self) -> bool {
        self.retryability() == Retryability::NonRetryable
    }
}

/// Why the retry loop stopped without a result.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The breaker refused an attempt. `last` is the failure that preceded
    /// the refusal, if any attempt was made.
    #[error("circuit open after {attempts} attempt(s)")]
    CircuitOpen { attempts: u32, last: Option<E> },

    /// Every attempt in the budget failed with a retryable error.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with a non-retryable error.
    #[error("non-retryable failure on attempt {attempts}: {error}")]
    Aborted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Attempts actually made before stopping.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::CircuitOpen { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Aborted { attempts, .. } => *attempts,
        }
    }
}

/// Runs `operation` until it succeeds, fails non-retryably, exhausts
/// `policy.max_attempts`, or the breaker refuses an attempt.
///
/// `operation` receives the zero-based attempt index.
pub async fn execute<T, E, F, Fut>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: AttemptError,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.attempts();
    let mut attempts = 0;
    let mut last: Option<E> = None;

    loop {
        let Some(permit) = breaker.try_acquire() else {
            tracing::warn!(breaker = breaker.name(), attempts, "call refused by open circuit");
            return Err(RetryError::CircuitOpen { attempts, last });
        };

        let outcome = operation(attempts).await;
        attempts += 1;

        let error = match outcome {
            Ok(value) => {
                permit.success();
                return Ok(value);
            }
            Err(error) => error,
        };

        if error.indicates_unhealthy() {
            permit.failure();
        } else {
            permit.success();
        }

        if error.is_final() || !policy.is_retryable(error.kind()) {
            return Err(RetryError::Aborted { attempts, error });
        }
        if attempts >= max_attempts {
            return Err(RetryError::Exhausted { attempts, last: error });
        }
        if breaker.is_rejecting() {
            tracing::warn!(
                breaker = breaker.name(),
                attempts,
                "circuit opened mid-retry; abandoning remaining attempts"
            );
            return Err(RetryError::CircuitOpen {
                attempts,
                last: Some(error),
            });
        }

        let delay = policy.delay(attempts - 1, jitter_sample(), error.retry_after());
        tracing::info!(
            attempt = attempts,
            max_attempts,
            error_kind = %error.kind(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "attempt failed; backing off"
        );
        last = Some(error);
        tokio::time::sleep(delay).await;
    }
}

fn jitter_sample() -> f64 {
    rand::rng().random_range(-1.0..=1.0)
}
