//! Corruption index persistence
//!
//! The index is saved after every partition-level mutation so a killed run
//! loses at most the partition that was in flight. Two interchangeable
//! backends sit behind [`CheckpointStore`]:
//! - [`JsonCheckpointStore`]: pretty-printed JSON document (default)
//! - [`SqliteCheckpointStore`]: embedded SQLite database
//!
//! `load` returns `None` only when the checkpoint does not exist. A checkpoint
//! that exists but cannot be read is an error; silently rescanning would
//! throw away repair progress.

mod json_store;
mod sqlite_store;

pub use json_store::JsonCheckpointStore;
pub use sqlite_store::SqliteCheckpointStore;

use async_trait::async_trait;
use imgfix_common::config::{CheckpointBackend, RepairConfig};
use imgfix_common::models::CorruptionIndex;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Checkpoint errors (fatal)
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Checkpoint exists but is unreadable or malformed
    #[error("Failed to load checkpoint {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// Checkpoint could not be written
    #[error("Failed to save checkpoint {path}: {reason}")]
    Save { path: PathBuf, reason: String },
}

impl CheckpointError {
    pub(crate) fn load(path: &Path, reason: impl ToString) -> Self {
        CheckpointError::Load {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn save(path: &Path, reason: impl ToString) -> Self {
        CheckpointError::Save {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Durable storage for the corruption index
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persisted index, or `None` if no checkpoint exists yet
    async fn load(&self) -> Result<Option<CorruptionIndex>, CheckpointError>;

    /// Replace the persisted index
    async fn save(&self, index: &CorruptionIndex) -> Result<(), CheckpointError>;

    /// Where the checkpoint lives (for logging)
    fn location(&self) -> &Path;
}

/// Open the backend selected by the configuration
pub fn open_store(config: &RepairConfig) -> Box<dyn CheckpointStore> {
    match config.checkpoint_backend {
        CheckpointBackend::Json => Box::new(JsonCheckpointStore::new(&config.checkpoint_path)),
        CheckpointBackend::Sqlite => Box::new(SqliteCheckpointStore::new(&config.checkpoint_path)),
    }
}
