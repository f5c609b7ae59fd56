//! Common error types for imgfix

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for imgfix operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the repair pipeline and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Evaluation manifest missing or malformed
    #[error("Manifest error in {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
}
