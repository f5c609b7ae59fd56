//! Error types for imgfix
//!
//! Each component owns its error enum; [`RepairError`] is what the pipeline
//! and the binary see. Every variant here is fatal for the run. Recoverable
//! per-partition failures (fetch, extraction) never reach this type.

use crate::checkpoint::CheckpointError;
use crate::services::{MetadataLoadError, ScanError};
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error
#[derive(Debug, Error)]
pub enum RepairError {
    /// Metadata table missing or unreadable
    #[error(transparent)]
    MetadataLoad(#[from] MetadataLoadError),

    /// Scan hit a verification failure it cannot classify
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Checkpoint unreadable or could not be written
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Configuration or manifest error
    #[error(transparent)]
    Common(#[from] imgfix_common::Error),

    /// `status` was asked for but nothing has been scanned yet
    #[error("No checkpoint at {0}; run a scan first")]
    NoCheckpoint(PathBuf),

    /// Background task failed
    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type for pipeline operations
pub type RepairResult<T> = Result<T, RepairError>;
