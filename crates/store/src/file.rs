use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pipeline::{PipelineState, PipelineStore, ProjectId, StoreError};

const EXTENSION: &str = "json";

/// Stores each project as `<directory>/<project_id>.json`.
///
/// Saves write a sibling temporary file and rename it over the target, so a
/// crash mid-write leaves the previous snapshot in place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, project_id: ProjectId) -> PathBuf {
        self.directory.join(format!("{project_id}.{EXTENSION}"))
    }
}

fn io_error(action: &str, path: &Path, error: std::io::Error) -> StoreError {
    StoreError::Io(format!("{action} {}: {error}", path.display()))
}

#[async_trait]
impl PipelineStore for JsonFileStore {
    async fn load(&self, project_id: ProjectId) -> Result<Option<PipelineState>, StoreError> {
        let path = self.path_for(project_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("reading", &path, e)),
        };
        let state: PipelineState = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        if state.project_id() != project_id {
            return Err(StoreError::Corrupt(format!(
                "{} holds project {}",
                path.display(),
                state.project_id()
            )));
        }
        Ok(Some(state))
    }

    async fn save(&self, state: &PipelineState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| io_error("creating", &self.directory, e))?;

        let path = self.path_for(state.project_id());
        let staging = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::Corrupt(format!("serialising {}: {e}", state.project_id())))?;
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| io_error("writing", &staging, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error("replacing", &path, e))?;
        tracing::debug!(path = %path.display(), "pipeline state saved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProjectId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("listing", &self.directory, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing", &self.directory, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).map(str::parse::<ProjectId>) {
                Some(Ok(id)) => ids.push(id),
                _ => tracing::warn!(path = %path.display(), "ignoring unrecognised file in store directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
