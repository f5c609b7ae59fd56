//! Dataset integrity scanner
//!
//! Two-phase scan of the evaluation manifest:
//! - Phase 1: parallel structural verification of every referenced file (rayon)
//! - Phase 2: sequential merge in manifest order, resolving each corrupt file
//!   to its origin partition
//!
//! The merge is sequential so the resulting [`CorruptionIndex`] is identical
//! across runs regardless of thread scheduling.

use crate::services::image_verifier::{verify_image, VerifyError};
use image::ImageFormat;
use crate::services::metadata_resolver::MetadataResolver;
use imgfix_common::models::{CorruptImageEntry, CorruptionIndex, ImageReference};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Scanner errors (fatal for the run)
#[derive(Debug, Error)]
pub enum ScanError {
    /// Verification failed in a way that does not indicate file damage
    #[error("Unrecognized verification failure for {path}: {reason}")]
    Unrecognized { path: PathBuf, reason: String },

    /// Verification worker panicked or was cancelled
    #[error("Scan worker failed: {0}")]
    Worker(String),
}

/// Result of scanning a manifest
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Corrupt files grouped by origin partition
    pub index: CorruptionIndex,
    /// Distinct files verified
    pub checked: usize,
    pub healthy: usize,
    /// Corrupt files, resolved or not
    pub corrupt: usize,
    /// Corrupt files whose name is absent from the metadata table
    pub unresolved: Vec<PathBuf>,
    /// Manifest references pointing at an already-seen file
    pub duplicate_references: usize,
}

/// Per-file verification routine
pub type VerifyFn = fn(&Path) -> Result<ImageFormat, VerifyError>;

/// Verifies manifest-referenced files under a dataset root
#[derive(Debug, Clone)]
pub struct IntegrityScanner {
    dataset_root: PathBuf,
    verify: VerifyFn,
}

impl IntegrityScanner {
    pub fn new(dataset_root: impl Into<PathBuf>) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            verify: verify_image,
        }
    }

    /// Replace the structural verifier
    pub fn with_verifier(mut self, verify: VerifyFn) -> Self {
        self.verify = verify;
        self
    }

    /// Verify every referenced file and build the corruption index
    pub fn scan(
        &self,
        references: &[ImageReference],
        resolver: &MetadataResolver,
    ) -> Result<ScanReport, ScanError> {
        let mut report = ScanReport::default();

        let mut seen = HashSet::new();
        let mut paths = Vec::with_capacity(references.len());
        for reference in references {
            let full_path = reference.full_path(&self.dataset_root);
            if seen.insert(full_path.clone()) {
                paths.push(full_path);
            } else {
                report.duplicate_references += 1;
            }
        }

        info!(
            files = paths.len(),
            root = %self.dataset_root.display(),
            "Verifying dataset images"
        );

        // Phase 1: parallel verification, results keep input order
        let outcomes: Vec<Result<(), VerifyError>> = paths
            .par_iter()
            .map(|path| (self.verify)(path).map(|_| ()))
            .collect();

        // Phase 2: sequential merge
        for (path, outcome) in paths.into_iter().zip(outcomes) {
            report.checked += 1;
            match outcome {
                Ok(()) => report.healthy += 1,
                Err(VerifyError::Unrecognized(reason)) => {
                    return Err(ScanError::Unrecognized { path, reason });
                }
                Err(err @ VerifyError::Corrupt { .. }) => {
                    report.corrupt += 1;
                    debug!(path = %path.display(), error = %err, "Corrupt image");
                    Self::record_corrupt(&mut report, resolver, path);
                }
            }
        }

        info!(
            checked = report.checked,
            healthy = report.healthy,
            corrupt = report.corrupt,
            unresolved = report.unresolved.len(),
            partitions = report.index.len(),
            "Scan complete"
        );

        Ok(report)
    }

    /// Async wrapper running the scan on the blocking pool
    pub async fn scan_blocking(
        &self,
        references: Vec<ImageReference>,
        resolver: std::sync::Arc<MetadataResolver>,
    ) -> Result<ScanReport, ScanError> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&references, &resolver))
            .await
            .map_err(|e| ScanError::Worker(e.to_string()))?
    }

    fn record_corrupt(report: &mut ScanReport, resolver: &MetadataResolver, path: PathBuf) {
        let Some(entry) = CorruptImageEntry::from_path(&path) else {
            warn!(path = %path.display(), "Corrupt image has no usable file name; skipped");
            report.unresolved.push(path);
            return;
        };

        match resolver.resolve(&entry.filename) {
            Some(partition_id) => {
                report.index.record(partition_id, entry);
            }
            None => {
                warn!(
                    path = %path.display(),
                    filename = %entry.filename,
                    "Corrupt image not found in metadata table; cannot repair"
                );
                report.unresolved.push(path);
            }
        }
    }
}
