//! Port traits for external collaborators.
//!
//! Infrastructure crates implement these; the domain never sees HTTP clients,
//! files, or databases.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{InferenceError, PipelineState, ProjectId, StoreError, TokenUsage};

// ---------------------------------------------------------------------------
// Inference dependency
// ---------------------------------------------------------------------------

/// One request to the generative inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Stage instructions.
    pub system: String,
    /// Stage input rendered for the model, plus any revision or repair notes.
    pub prompt: String,
    /// Description of the JSON shape the response must take.
    pub schema_hint: Value,
    /// Deadline the provider should apply to its own transport.
    pub timeout: Duration,
}

/// Raw model output with the usage the provider reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// The generative inference service.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Saves and restores [`PipelineState`] snapshots by project.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn load(&self, project_id: ProjectId) -> Result<Option<PipelineState>, StoreError>;

    /// Replaces the stored state for `state.project_id()` in one step.
    async fn save(&self, state: &PipelineState) -> Result<(), StoreError>;

    /// Every stored project, in no particular order.
    async fn list(&self) -> Result<Vec<ProjectId>, StoreError>;
}
