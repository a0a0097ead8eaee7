//! The execution context threaded through every task executor.
//!
//! Executors receive the dependency handle and the shared breaker through
//! this struct instead of reading process globals. Metrics and policies
//! travel with it as well.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{BreakerConfig, CircuitBreaker, InferenceProvider, MetricsCollector, RetryPolicy};

/// Default deadline for a single inference attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ExecutionContext {
    pub provider: Arc<dyn InferenceProvider>,
    pub breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<MetricsCollector>,
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl ExecutionContext {
    /// Context with a fresh breaker and metrics sink and default policies.
    pub fn new(provider: Arc<dyn InferenceProvider>) -> Self {
        Self {
            provider,
            breaker: Arc::new(CircuitBreaker::new("inference", BreakerConfig::default())),
            metrics: Arc::new(MetricsCollector::new()),
            retry: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}
