//! The pipeline orchestrator.
//!
//! Every operation follows the same shape under the project's lock:
//! load → check precondition → run the stage (if any) → apply to the loaded
//! copy → save. Nothing is saved unless every step succeeds, so a failed
//! operation can be retried by the caller as is.
//!
//! Projects are locked individually; operations on different projects run
//! concurrently and share only the breaker and the metrics sink.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pipeline::{
    ExecutionError, PipelineError, PipelineState, PipelineStore, ProjectId, ProjectName,
    ResearchBrief, StageId, Timestamp,
};
use serde_json::{Map, Value};

use crate::executor::{RunOptions, StageRequest, TaskExecutor};
use crate::runner::{submit_erased, InputScope, StageRunner};
use crate::stages::{CohortStage, FramingStage, HandoffStage, SurveyDesignStage};
use crate::ExecutionContext;

/// Default cap on revisions per stage.
pub const DEFAULT_MAX_REVISIONS: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Revisions allowed after a stage's first artifact; `None` is unbounded.
    pub max_revisions_per_stage: Option<u32>,
    /// Projects idle longer than this reject everything except `reset` and `status`.
    pub idle_ttl: Option<Duration>,
    /// Deadline for each stage run, retries included.
    pub operation_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_revisions_per_stage: Some(DEFAULT_MAX_REVISIONS),
            idle_ttl: None,
            operation_timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage registry
// ---------------------------------------------------------------------------

/// Exactly one runner per stage, indexed by stage order.
#[derive(Clone)]
pub struct StageRegistry {
    runners: Vec<Arc<dyn StageRunner>>,
}

impl StageRegistry {
    /// Builds a registry, rejecting a missing or duplicated stage.
    pub fn new(runners: Vec<Arc<dyn StageRunner>>) -> Result<Self, PipelineError> {
        let mut slots: Vec<Option<Arc<dyn StageRunner>>> = vec![None; StageId::ORDER.len()];
        for runner in runners {
            let stage = runner.stage();
            let slot = &mut slots[stage.index()];
            if slot.is_some() {
                return Err(PipelineError::Configuration {
                    message: format!("more than one runner registered for stage {stage}"),
                });
            }
            *slot = Some(runner);
        }

        let mut ordered = Vec::with_capacity(slots.len());
        for (stage, slot) in StageId::ORDER.into_iter().zip(slots) {
            match slot {
                Some(runner) => ordered.push(runner),
                None => {
                    return Err(PipelineError::Configuration {
                        message: format!("no runner registered for stage {stage}"),
                    })
                }
            }
        }
        Ok(Self { runners: ordered })
    }

    /// The survey-research pipeline: three inference stages, two handoffs.
    pub fn standard(context: ExecutionContext) -> Self {
        let metrics = Arc::clone(&context.metrics);
        Self {
            runners: vec![
                Arc::new(TaskExecutor::new(FramingStage::new(), context.clone())),
                Arc::new(TaskExecutor::new(SurveyDesignStage::new(), context.clone())),
                Arc::new(TaskExecutor::new(CohortStage::new(), context)),
                Arc::new(HandoffStage::distribution(Arc::clone(&metrics))),
                Arc::new(HandoffStage::analysis(metrics)),
            ],
        }
    }

    pub fn runner(&self, stage: StageId) -> &Arc<dyn StageRunner> {
        &self.runners[stage.index()]
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.runners.iter().map(|r| r.stage()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<dyn PipelineStore>,
    stages: StageRegistry,
    config: OrchestratorConfig,
    locks: DashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn PipelineStore>, stages: StageRegistry, config: OrchestratorConfig) -> Self {
        Self {
            store,
            stages,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Creates and persists a project with every stage pending.
    #[tracing::instrument(skip_all, fields(project = %name, project_id))]
    pub async fn create_project(
        &self,
        name: ProjectName,
        question: impl Into<String> + Send,
    ) -> Result<ProjectId, PipelineError> {
        let project_id = ProjectId::new_random();
        tracing::Span::current().record("project_id", tracing::field::display(project_id));
        let state = PipelineState::new(
            project_id,
            ResearchBrief {
                name,
                question: question.into(),
            },
        );
        self.store.save(&state).await?;
        tracing::info!("project created");
        Ok(project_id)
    }

    /// Current snapshot of a project.
    pub async fn status(&self, project_id: ProjectId) -> Result<PipelineState, PipelineError> {
        self.load(project_id).await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectId>, PipelineError> {
        Ok(self.store.list().await?)
    }

    /// Runs the next stage on the approved current artifact, or generates the
    /// first stage of a fresh project.
    #[tracing::instrument(skip_all, fields(project_id = %project_id, stage))]
    pub async fn advance(&self, project_id: ProjectId) -> Result<PipelineState, PipelineError> {
        let _lock = self.lock(project_id).await;

        let mut state = self.load(project_id).await?;
        state.check_idle(self.config.idle_ttl, Timestamp::now())?;
        let stage = state.check_advance()?;
        tracing::Span::current().record("stage", tracing::field::display(stage));

        let input = self.stage_input(&state, stage)?;
        let artifact = self.execute(stage, StageRequest::Generate { input }).await?;
        state.apply_generated(artifact)?;
        self.store.save(&state).await?;
        tracing::info!("stage generated; awaiting approval");
        Ok(state)
    }

    /// Regenerates the current stage's artifact with reviewer feedback.
    #[tracing::instrument(skip_all, fields(project_id = %project_id, stage))]
    pub async fn revise(&self, project_id: ProjectId, feedback: &str) -> Result<PipelineState, PipelineError> {
        let _lock = self.lock(project_id).await;

        let mut state = self.load(project_id).await?;
        state.check_idle(self.config.idle_ttl, Timestamp::now())?;
        let stage = state.check_revise(self.config.max_revisions_per_stage)?;
        tracing::Span::current().record("stage", tracing::field::display(stage));

        let prior = state.artifact(stage).cloned().ok_or_else(|| ExecutionError::Internal {
            stage,
            message: "awaiting approval without an artifact".into(),
        })?;
        let input = self.stage_input(&state, stage)?;
        let request = StageRequest::Revise {
            input,
            prior,
            feedback: feedback.to_string(),
        };
        let artifact = self.execute(stage, request).await?;
        state.apply_revision(artifact)?;
        self.store.save(&state).await?;
        tracing::info!(revision = state.record(stage).revision, "stage revised");
        Ok(state)
    }

    /// Approves the current stage's artifact.
    #[tracing::instrument(skip_all, fields(project_id = %project_id))]
    pub async fn approve(&self, project_id: ProjectId) -> Result<PipelineState, PipelineError> {
        let _lock = self.lock(project_id).await;

        let mut state = self.load(project_id).await?;
        state.check_idle(self.config.idle_ttl, Timestamp::now())?;
        let stage = state.apply_approval()?;
        self.store.save(&state).await?;
        tracing::info!(stage = %stage, "stage approved");
        Ok(state)
    }

    /// Discards every artifact and returns the project to framing.
    #[tracing::instrument(skip_all, fields(project_id = %project_id))]
    pub async fn reset(&self, project_id: ProjectId) -> Result<PipelineState, PipelineError> {
        let _lock = self.lock(project_id).await;

        let mut state = self.load(project_id).await?;
        state.reset();
        self.store.save(&state).await?;
        tracing::info!("project reset");
        Ok(state)
    }

    /// Projects with an operation running or queued.
    pub fn locked_projects(&self) -> usize {
        self.locks.len()
    }

    async fn lock(&self, project_id: ProjectId) -> ProjectLock<'_> {
        let mutex = Arc::clone(self.locks.entry(project_id).or_default().value());
        ProjectLock {
            locks: &self.locks,
            project_id,
            guard: Some(mutex.lock_owned().await),
        }
    }

    async fn load(&self, project_id: ProjectId) -> Result<PipelineState, PipelineError> {
        self.store
            .load(project_id)
            .await?
            .ok_or(PipelineError::ProjectNotFound(project_id))
    }

    async fn execute(
        &self,
        stage: StageId,
        request: StageRequest<Value, Value>,
    ) -> Result<pipeline::Artifact<Value>, ExecutionError> {
        let options = RunOptions {
            deadline: self.config.operation_timeout,
        };
        submit_erased(Arc::clone(self.stages.runner(stage)), request, options)
            .join()
            .await
    }

    /// Input for `stage`, built from the brief and approved upstream artifacts.
    fn stage_input(&self, state: &PipelineState, stage: StageId) -> Result<Value, ExecutionError> {
        let brief = serde_json::to_value(state.brief()).map_err(|e| ExecutionError::Internal {
            stage,
            message: format!("research brief does not serialise: {e}"),
        })?;
        let upstream = |from: StageId| {
            state
                .artifact(from)
                .map(|a| a.payload().clone())
                .ok_or_else(|| ExecutionError::Internal {
                    stage,
                    message: format!("upstream stage {from} has no artifact"),
                })
        };

        match self.stages.runner(stage).input_scope() {
            InputScope::Previous => match stage.previous() {
                None => Ok(brief),
                Some(previous) => upstream(previous),
            },
            InputScope::AllUpstream => {
                let mut all = Map::new();
                all.insert("brief".into(), brief);
                for from in StageId::ORDER.into_iter().take(stage.index()) {
                    all.insert(from.as_str().into(), upstream(from)?);
                }
                Ok(Value::Object(all))
            }
        }
    }
}

/// Holds a project's lock; the table entry goes when nobody else wants it.
struct ProjectLock<'a> {
    locks: &'a DashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>,
    project_id: ProjectId,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for ProjectLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one is the table alone.
        self.locks
            .remove_if(&self.project_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.stages)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
