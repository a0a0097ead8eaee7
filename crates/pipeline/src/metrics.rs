//! Per-stage call metrics.
//!
//! [`MetricsCollector`] is a lock-free aggregation sink: every attempt made by
//! every executor records one [`CallEvent`], and counters only ever grow.
//! Delta calculation is the caller's responsibility.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{StageId, TokenCount};

/// One inference attempt, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEvent {
    pub stage: StageId,
    pub duration: Duration,
    pub tokens: TokenCount,
    pub succeeded: bool,
}

/// Aggregated counters for a stage, a single run, or the whole process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub call_count: u64,
    pub total_tokens: TokenCount,
    pub elapsed_ms: u64,
    pub error_count: u64,
}

impl MetricsSnapshot {
    /// Folds one event into this snapshot.
    pub fn record(&mut self, event: &CallEvent) {
        self.call_count += 1;
        self.total_tokens += event.tokens;
        self.elapsed_ms = self.elapsed_ms.saturating_add(duration_ms(event.duration));
        if !event.succeeded {
            self.error_count += 1;
        }
    }

    /// Sum of two snapshots.
    pub fn merge(self, other: MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            call_count: self.call_count + other.call_count,
            total_tokens: self.total_tokens + other.total_tokens,
            elapsed_ms: self.elapsed_ms.saturating_add(other.elapsed_ms),
            error_count: self.error_count + other.error_count,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    tokens: AtomicU64,
    elapsed_us: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            call_count: self.calls.load(Ordering::Relaxed),
            total_tokens: TokenCount::new(self.tokens.load(Ordering::Relaxed)),
            elapsed_ms: self.elapsed_us.load(Ordering::Relaxed) / 1_000,
            error_count: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide metrics sink shared by every executor.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    stages: [Counters; 5],
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one event. Safe to call from any number of concurrent executions.
    pub fn record(&self, event: &CallEvent) {
        let counters = &self.stages[event.stage.index()];
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters
            .tokens
            .fetch_add(event.tokens.as_u64(), Ordering::Relaxed);
        let micros = u64::try_from(event.duration.as_micros()).unwrap_or(u64::MAX);
        counters.elapsed_us.fetch_add(micros, Ordering::Relaxed);
        if !event.succeeded {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Aggregate for one stage.
    pub fn snapshot(&self, stage: StageId) -> MetricsSnapshot {
        self.stages[stage.index()].snapshot()
    }

    /// Aggregate across all stages.
    pub fn total(&self) -> MetricsSnapshot {
        StageId::ORDER
            .into_iter()
            .map(|stage| self.snapshot(stage))
            .fold(MetricsSnapshot::default(), MetricsSnapshot::merge)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn event(stage: StageId, tokens: u64, succeeded: bool) -> CallEvent {
        CallEvent {
            stage,
            duration: Duration::from_millis(250),
            tokens: TokenCount::new(tokens),
            succeeded,
        }
    }

    #[test]
    fn stages_are_aggregated_independently() {
        let metrics = MetricsCollector::new();
        metrics.record(&event(StageId::Framing, 100, true));
        metrics.record(&event(StageId::Framing, 0, false));
        metrics.record(&event(StageId::SurveyDesign, 40, true));

        assert_eq!(
            metrics.snapshot(StageId::Framing),
            MetricsSnapshot {
                call_count: 2,
                total_tokens: TokenCount::new(100),
                elapsed_ms: 500,
                error_count: 1,
            }
        );
        assert_eq!(metrics.snapshot(StageId::SurveyDesign).call_count, 1);
        assert_eq!(metrics.snapshot(StageId::Analysis), MetricsSnapshot::default());
        assert_eq!(metrics.total().total_tokens, TokenCount::new(140));
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let metrics = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record(&event(StageId::CohortSelection, 1, true));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = metrics.snapshot(StageId::CohortSelection);
        assert_eq!(snap.call_count, 8_000);
        assert_eq!(snap.total_tokens, TokenCount::new(8_000));
    }

    #[test]
    fn snapshot_record_matches_collector() {
        let mut local = MetricsSnapshot::default();
        local.record(&event(StageId::Framing, 10, false));
        assert_eq!(local.call_count, 1);
        assert_eq!(local.error_count, 1);
        assert_eq!(local.elapsed_ms, 250);
    }
}
