//! Per-project workflow state.
//!
//! [`PipelineState`] is a plain value: the orchestrator loads it, checks the
//! precondition of the requested operation, runs the stage executor, applies
//! the result to a copy, and saves the copy. A failure at any point leaves the
//! stored state untouched.
//!
//! The serialised form is the snapshot handed to persistence collaborators:
//! `{project_id, brief, current_stage, stages: [{name, status, revision, artifact}], ...}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Artifact, Operation, PreconditionError, ProjectId, ProjectName, ReviewAction, StageId,
    StageStatus, Timestamp,
};

/// What the project is researching; the input to the framing stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchBrief {
    pub name: ProjectName,
    pub question: String,
}

/// One stage's slot in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageId,
    pub status: StageStatus,
    /// Revision of `artifact`, or `0` when none has been produced.
    pub revision: u32,
    pub artifact: Option<Artifact<Value>>,
}

impl StageRecord {
    fn pending(name: StageId) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            revision: 0,
            artifact: None,
        }
    }
}

/// Workflow state of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    project_id: ProjectId,
    brief: ResearchBrief,
    current_stage: StageId,
    stages: Vec<StageRecord>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl PipelineState {
    /// Fresh state: every stage pending, positioned at [`StageId::FIRST`].
    pub fn new(project_id: ProjectId, brief: ResearchBrief) -> Self {
        let now = Timestamp::now();
        Self {
            project_id,
            brief,
            current_stage: StageId::FIRST,
            stages: StageId::ORDER.into_iter().map(StageRecord::pending).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn brief(&self) -> &ResearchBrief {
        &self.brief
    }

    pub fn current_stage(&self) -> StageId {
        self.current_stage
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn record(&self, stage: StageId) -> &StageRecord {
        &self.stages[stage.index()]
    }

    pub fn status(&self, stage: StageId) -> StageStatus {
        self.record(stage).status
    }

    pub fn current_status(&self) -> StageStatus {
        self.status(self.current_stage)
    }

    pub fn artifact(&self, stage: StageId) -> Option<&Artifact<Value>> {
        self.record(stage).artifact.as_ref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// `true` once the final stage has been approved.
    pub fn is_complete(&self) -> bool {
        self.current_stage.next().is_none() && self.current_status() == StageStatus::Approved
    }

    // -----------------------------------------------------------------------
    // Preconditions
    // -----------------------------------------------------------------------

    /// Rejects operations on a project idle for longer than `ttl`.
    pub fn check_idle(&self, ttl: Option<Duration>, now: Timestamp) -> Result<(), PreconditionError> {
        match ttl {
            Some(ttl) if self.updated_at.elapsed_until(now) > ttl => Err(PreconditionError::Expired {
                since: self.updated_at,
            }),
            _ => Ok(()),
        }
    }

    /// Stage whose executor `advance` should run.
    ///
    /// A pending framing stage (fresh or reset project) is generated in place;
    /// otherwise the current stage must be approved and the next stage is run.
    pub fn check_advance(&self) -> Result<StageId, PreconditionError> {
        let stage = self.current_stage;
        let status = self.current_status();
        if stage == StageId::FIRST && status == StageStatus::Pending {
            return Ok(stage);
        }
        if status != StageStatus::Approved {
            return Err(self.invalid(Operation::Advance));
        }
        stage
            .next()
            .ok_or(PreconditionError::PipelineComplete { stage })
    }

    /// Stage `revise` should re-run, enforcing the optional revision cap.
    pub fn check_revise(&self, max_revisions: Option<u32>) -> Result<StageId, PreconditionError> {
        let stage = self.current_stage;
        if self.current_status().apply(ReviewAction::Revise).is_none() {
            return Err(self.invalid(Operation::Revise));
        }
        if let Some(limit) = max_revisions {
            let revisions_so_far = self.record(stage).revision.saturating_sub(1);
            if revisions_so_far >= limit {
                return Err(PreconditionError::RevisionLimitReached { stage, limit });
            }
        }
        Ok(stage)
    }

    /// Stage `approve` would approve.
    pub fn check_approve(&self) -> Result<StageId, PreconditionError> {
        if self.current_status().apply(ReviewAction::Approve).is_none() {
            return Err(self.invalid(Operation::Approve));
        }
        Ok(self.current_stage)
    }

    fn invalid(&self, operation: Operation) -> PreconditionError {
        PreconditionError::InvalidTransition {
            operation,
            stage: self.current_stage,
            actual: self.current_status(),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Stores a first-revision artifact and moves `current_stage` onto its stage.
    pub fn apply_generated(&mut self, artifact: Artifact<Value>) -> Result<(), PreconditionError> {
        let target = self.check_advance()?;
        if artifact.stage() != target || artifact.revision() != 1 {
            return Err(self.invalid(Operation::Advance));
        }
        self.commit(target, ReviewAction::Generate, Operation::Advance, Some(artifact))?;
        self.current_stage = target;
        Ok(())
    }

    /// Replaces the current stage's artifact with its next revision.
    pub fn apply_revision(&mut self, artifact: Artifact<Value>) -> Result<(), PreconditionError> {
        let stage = self.check_revise(None)?;
        let expected = self.record(stage).revision + 1;
        if artifact.stage() != stage || artifact.revision() != expected {
            return Err(self.invalid(Operation::Revise));
        }
        self.commit(stage, ReviewAction::Revise, Operation::Revise, Some(artifact))
    }

    /// Marks the current stage approved.
    pub fn apply_approval(&mut self) -> Result<StageId, PreconditionError> {
        let stage = self.check_approve()?;
        self.commit(stage, ReviewAction::Approve, Operation::Approve, None)?;
        Ok(stage)
    }

    /// Clears every artifact and status and returns to [`StageId::FIRST`].
    pub fn reset(&mut self) {
        self.stages = StageId::ORDER.into_iter().map(StageRecord::pending).collect();
        self.current_stage = StageId::FIRST;
        self.updated_at = Timestamp::now();
    }

    fn commit(
        &mut self,
        stage: StageId,
        action: ReviewAction,
        operation: Operation,
        artifact: Option<Artifact<Value>>,
    ) -> Result<(), PreconditionError> {
        let record = &self.stages[stage.index()];
        let status = record
            .status
            .apply(action)
            .ok_or(PreconditionError::InvalidTransition {
                operation,
                stage,
                actual: record.status,
            })?;

        let record = &mut self.stages[stage.index()];
        record.status = status;
        if let Some(artifact) = artifact {
            record.revision = artifact.revision();
            record.artifact = Some(artifact);
        }
        self.updated_at = Timestamp::now();
        Ok(())
    }
}
