//! Type-erased stage runners.
//!
//! The orchestrator holds one runner per stage and speaks only JSON values to
//! them; each runner decodes its own input and prior artifact.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{Artifact, ExecutionError, StageId};
use serde_json::Value;

use crate::executor::{ExecutionHandle, RunOptions, StageDefinition, StageRequest, TaskExecutor};

/// Which upstream artifacts a stage receives as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputScope {
    /// The previous stage's payload (the research brief for the first stage).
    Previous,
    /// An object holding the brief and every upstream payload, keyed by stage name.
    AllUpstream,
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    fn stage(&self) -> StageId;

    fn input_scope(&self) -> InputScope {
        InputScope::Previous
    }

    async fn run_erased(
        &self,
        request: StageRequest<Value, Value>,
        options: RunOptions,
    ) -> Result<Artifact<Value>, ExecutionError>;
}

#[async_trait]
impl<S: StageDefinition> StageRunner for TaskExecutor<S> {
    fn stage(&self) -> StageId {
        self.definition().stage()
    }

    async fn run_erased(
        &self,
        request: StageRequest<Value, Value>,
        options: RunOptions,
    ) -> Result<Artifact<Value>, ExecutionError> {
        let stage = StageRunner::stage(self);
        let internal = |what: &str, error: serde_json::Error| ExecutionError::Internal {
            stage,
            message: format!("{what} does not decode: {error}"),
        };

        let typed = match request {
            StageRequest::Generate { input } => StageRequest::Generate {
                input: serde_json::from_value(input).map_err(|e| internal("stage input", e))?,
            },
            StageRequest::Revise {
                input,
                prior,
                feedback,
            } => StageRequest::Revise {
                input: serde_json::from_value(input).map_err(|e| internal("stage input", e))?,
                prior: prior.decode().map_err(|e| internal("prior artifact", e))?,
                feedback,
            },
        };

        let artifact = self.run(typed, options).await?;
        artifact
            .to_json()
            .map_err(|e| internal("produced artifact", e))
    }
}

/// Runs `runner` on its own task; the orchestrator joins the handle.
pub fn submit_erased(
    runner: Arc<dyn StageRunner>,
    request: StageRequest<Value, Value>,
    options: RunOptions,
) -> ExecutionHandle<Artifact<Value>> {
    let stage = runner.stage();
    ExecutionHandle::spawn(stage, async move { runner.run_erased(request, options).await })
}
