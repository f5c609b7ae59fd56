//! Evaluation manifest
//!
//! The manifest is a JSON array written by the generation/scoring workflows.
//! Each record carries an `image_path` field holding one dataset-relative path
//! or a list of them; every other field is ignored here.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One image the scan must verify
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub dataset_relative_path: PathBuf,
}

impl ImageReference {
    pub fn new(dataset_relative_path: impl Into<PathBuf>) -> Self {
        Self {
            dataset_relative_path: dataset_relative_path.into(),
        }
    }

    /// Location of the referenced file on disk
    pub fn full_path(&self, dataset_root: &Path) -> PathBuf {
        dataset_root.join(&self.dataset_relative_path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ImagePaths {
    One(String),
    Many(Vec<String>),
}

/// A manifest row (only the image paths are read)
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestRecord {
    #[serde(rename = "image_path")]
    image_paths: ImagePaths,
}

impl ManifestRecord {
    pub fn image_paths(&self) -> Vec<&str> {
        match &self.image_paths {
            ImagePaths::One(p) => vec![p.as_str()],
            ImagePaths::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

/// Parse manifest JSON into image references, in manifest order
pub fn parse_manifest(content: &str) -> std::result::Result<Vec<ImageReference>, serde_json::Error> {
    let records: Vec<ManifestRecord> = serde_json::from_str(content)?;
    Ok(records
        .iter()
        .flat_map(|r| r.image_paths())
        .map(ImageReference::new)
        .collect())
}

/// Load the manifest file
pub fn load_manifest(path: &Path) -> Result<Vec<ImageReference>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let references = parse_manifest(&content).map_err(|e| Error::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    tracing::debug!(
        manifest = %path.display(),
        references = references.len(),
        "Loaded evaluation manifest"
    );

    Ok(references)
}
