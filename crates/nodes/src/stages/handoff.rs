//! Distribution and analysis: handoffs to external collaborators.
//!
//! These stages make no inference call. They record what was passed to the
//! collaborator so the pipeline can still track, review, and approve them.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{Artifact, CallEvent, ExecutionError, MetricsCollector, StageId, TokenCount};
use serde_json::Value;
use tokio::time::Instant;

use super::models::HandoffRecord;
use crate::executor::{RunOptions, StageRequest};
use crate::runner::{InputScope, StageRunner};

#[derive(Debug, Clone)]
pub struct HandoffStage {
    stage: StageId,
    collaborator: String,
    metrics: Arc<MetricsCollector>,
}

impl HandoffStage {
    pub fn new(stage: StageId, collaborator: impl Into<String>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            stage,
            collaborator: collaborator.into(),
            metrics,
        }
    }

    pub fn distribution(metrics: Arc<MetricsCollector>) -> Self {
        Self::new(StageId::Distribution, "survey-distribution", metrics)
    }

    pub fn analysis(metrics: Arc<MetricsCollector>) -> Self {
        Self::new(StageId::Analysis, "response-analysis", metrics)
    }
}

#[async_trait]
impl StageRunner for HandoffStage {
    fn stage(&self) -> StageId {
        self.stage
    }

    fn input_scope(&self) -> InputScope {
        InputScope::AllUpstream
    }

    async fn run_erased(
        &self,
        request: StageRequest<Value, Value>,
        _options: RunOptions,
    ) -> Result<Artifact<Value>, ExecutionError> {
        let started = Instant::now();
        let (upstream, prior, notes) = match request {
            StageRequest::Generate { input } => (input, None, None),
            StageRequest::Revise {
                input,
                prior,
                feedback,
            } => (input, Some(prior), Some(feedback)),
        };
        let record = HandoffRecord {
            collaborator: self.collaborator.clone(),
            upstream,
            notes,
        };
        let payload = serde_json::to_value(&record).map_err(|e| ExecutionError::Internal {
            stage: self.stage,
            message: format!("handoff record does not serialise: {e}"),
        })?;

        let event = CallEvent {
            stage: self.stage,
            duration: started.elapsed(),
            tokens: TokenCount::default(),
            succeeded: true,
        };
        self.metrics.record(&event);
        let mut snapshot = pipeline::MetricsSnapshot::default();
        snapshot.record(&event);

        tracing::info!(stage = %self.stage, collaborator = %self.collaborator, "handed off to external collaborator");
        Ok(match prior {
            None => Artifact::first(self.stage, payload, snapshot),
            Some(prior) => Artifact::revision_of(&prior, payload, snapshot),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn handoff_records_upstream_and_feeds_metrics() {
        let metrics = Arc::new(MetricsCollector::new());
        let stage = HandoffStage::distribution(Arc::clone(&metrics));
        let upstream = json!({ "survey_design": { "title": "Remote work" } });

        let first = stage
            .run_erased(StageRequest::Generate { input: upstream.clone() }, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(first.revision(), 1);
        assert_eq!(first.payload()["collaborator"], "survey-distribution");
        assert_eq!(first.payload()["upstream"], upstream);

        let second = stage
            .run_erased(
                StageRequest::Revise {
                    input: upstream,
                    prior: first,
                    feedback: "send next week".into(),
                },
                RunOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(second.revision(), 2);
        assert_eq!(second.payload()["notes"], "send next week");
        assert_eq!(metrics.snapshot(StageId::Distribution).call_count, 2);
    }
}
