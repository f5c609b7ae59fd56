//! JSON checkpoint backend

use super::{CheckpointError, CheckpointStore};
use async_trait::async_trait;
use imgfix_common::models::CorruptionIndex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Checkpoint stored as a pretty-printed JSON object keyed by partition id
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    path: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointStore {
    async fn load(&self) -> Result<Option<CorruptionIndex>, CheckpointError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::load(&self.path, e)),
        };

        let index: CorruptionIndex = serde_json::from_str(&content)
            .map_err(|e| CheckpointError::load(&self.path, e))?;

        debug!(
            checkpoint = %self.path.display(),
            partitions = index.len(),
            "Loaded JSON checkpoint"
        );
        Ok(Some(index))
    }

    async fn save(&self, index: &CorruptionIndex) -> Result<(), CheckpointError> {
        let content =
            serde_json::to_string_pretty(index).map_err(|e| CheckpointError::save(&self.path, e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CheckpointError::save(&self.path, e))?;
            }
        }

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| CheckpointError::save(&self.path, e))?;

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CheckpointError::save(&self.path, e));
        }

        debug!(checkpoint = %self.path.display(), "Checkpoint saved");
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
