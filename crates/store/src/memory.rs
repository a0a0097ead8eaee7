use async_trait::async_trait;
use dashmap::DashMap;
use pipeline::{PipelineState, PipelineStore, ProjectId, StoreError};

/// Keeps snapshots in memory.
///
/// States are stored by value, so a caller mutating a loaded state does not
/// affect what is stored until it saves.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    states: DashMap<ProjectId, PipelineState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl PipelineStore for InMemoryStore {
    async fn load(&self, project_id: ProjectId) -> Result<Option<PipelineState>, StoreError> {
        Ok(self.states.get(&project_id).map(|s| s.value().clone()))
    }

    async fn save(&self, state: &PipelineState) -> Result<(), StoreError> {
        self.states.insert(state.project_id(), state.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProjectId>, StoreError> {
        Ok(self.states.iter().map(|entry| *entry.key()).collect())
    }
}
