//! Partition repair executor
//!
//! Drains the corruption index one partition at a time, in ascending id order:
//! 1. Fetch the partition archive (failure: partition stays unfixed)
//! 2. Extract only the listed files back to their dataset paths
//! 3. Delete the archive and mark the partition fixed
//! 4. Persist the whole index
//!
//! Each file is staged next to its destination, verified, then renamed into
//! place, so an aborted partition never leaves a half-written image behind.
//! Files restored earlier in the same attempt stay in place. The scratch
//! archive is removed once the partition is fixed, or when it cannot be
//! opened as a zip container. Any other extraction failure leaves it in
//! scratch so the next run can reuse it instead of downloading it again.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::services::image_verifier::verify_image;
use crate::services::partition_fetcher::PartitionFetcher;
use imgfix_common::models::{CorruptImageEntry, CorruptionIndex, PartitionId};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

/// Extraction errors (recoverable: abort this partition, continue with the next)
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Archive could not be opened as a zip container
    #[error("Cannot open archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// Requested file is not in the archive
    #[error("{filename} not found in archive {archive}")]
    MemberMissing { archive: PathBuf, filename: String },

    /// Destination could not be written
    #[error("Failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    /// Extracted bytes failed verification
    #[error("Extracted file {path} failed verification: {reason}")]
    Verify { path: PathBuf, reason: String },

    /// Blocking extraction task failed
    #[error("Extraction worker failed: {0}")]
    Worker(String),
}

impl ExtractError {
    /// Whether the downloaded archive itself is unusable
    pub fn invalidates_archive(&self) -> bool {
        matches!(self, ExtractError::Archive { .. })
    }
}

/// What happened to one partition during a repair pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    Fixed { restored: usize },
    FetchFailed(String),
    ExtractFailed(String),
}

/// Per-pass repair results
#[derive(Debug, Clone, Default)]
pub struct RepairOutcome {
    /// Partitions already fixed before this pass (never fetched)
    pub skipped_fixed: usize,
    pub partitions: Vec<(PartitionId, PartitionOutcome)>,
}

impl RepairOutcome {
    pub fn fixed_count(&self) -> usize {
        self.partitions
            .iter()
            .filter(|(_, o)| matches!(o, PartitionOutcome::Fixed { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.partitions.len() - self.fixed_count()
    }
}

/// Restores corrupt files from their partition archives
#[derive(Debug, Clone, Default)]
pub struct RepairExecutor;

impl RepairExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Repair every unfixed partition, saving the index after each attempt
    ///
    /// Fetch and extraction failures are logged and recorded in the outcome.
    /// Only a checkpoint write failure stops the pass.
    pub async fn repair_all(
        &self,
        index: &mut CorruptionIndex,
        fetcher: &dyn PartitionFetcher,
        store: &dyn CheckpointStore,
    ) -> Result<RepairOutcome, CheckpointError> {
        let pending = index.pending_partitions();
        let mut outcome = RepairOutcome {
            skipped_fixed: index.len() - pending.len(),
            ..Default::default()
        };

        info!(
            pending = pending.len(),
            already_fixed = outcome.skipped_fixed,
            "Starting repair pass"
        );

        for partition_id in pending {
            let entries = match index.get(partition_id) {
                Some(state) => state.images.clone(),
                None => continue,
            };

            let result = self.repair_partition(partition_id, entries, fetcher).await;
            if let PartitionOutcome::Fixed { .. } = result {
                index.mark_fixed(partition_id);
            }
            outcome.partitions.push((partition_id, result));

            store.save(index).await.map_err(|e| {
                error!(partition = %partition_id, error = %e, "Checkpoint save failed");
                e
            })?;
        }

        info!(
            fixed = outcome.fixed_count(),
            failed = outcome.failed_count(),
            "Repair pass finished"
        );
        Ok(outcome)
    }

    async fn repair_partition(
        &self,
        partition_id: PartitionId,
        entries: Vec<CorruptImageEntry>,
        fetcher: &dyn PartitionFetcher,
    ) -> PartitionOutcome {
        if entries.is_empty() {
            info!(partition = %partition_id, "No images recorded; marking fixed");
            return PartitionOutcome::Fixed { restored: 0 };
        }

        let archive_path = match fetcher.fetch(partition_id).await {
            Ok(path) => path,
            Err(e) => {
                warn!(partition = %partition_id, error = %e, "Archive fetch failed; partition left unfixed");
                return PartitionOutcome::FetchFailed(e.to_string());
            }
        };

        let extraction = {
            let archive_path = archive_path.clone();
            tokio::task::spawn_blocking(move || extract_entries(&archive_path, &entries))
                .await
                .map_err(|e| ExtractError::Worker(e.to_string()))
                .and_then(|r| r)
        };

        let discard_archive = match &extraction {
            Ok(_) => true,
            Err(e) => e.invalidates_archive(),
        };

        let outcome = match extraction {
            Ok(restored) => {
                info!(partition = %partition_id, restored, "Partition repaired");
                PartitionOutcome::Fixed { restored }
            }
            Err(e) => {
                warn!(partition = %partition_id, error = %e, "Extraction failed; partition left unfixed");
                PartitionOutcome::ExtractFailed(e.to_string())
            }
        };

        if discard_archive {
            if let Err(e) = tokio::fs::remove_file(&archive_path).await {
                warn!(archive = %archive_path.display(), error = %e, "Failed to delete scratch archive");
            }
        } else {
            debug!(archive = %archive_path.display(), "Keeping scratch archive for the next attempt");
        }

        outcome
    }
}

/// Extract `entries` from the zip at `archive_path` to their destinations
///
/// Stops at the first failing entry; entries already restored are kept.
pub fn extract_entries(
    archive_path: &Path,
    entries: &[CorruptImageEntry],
) -> Result<usize, ExtractError> {
    let file = File::open(archive_path).map_err(|e| ExtractError::Archive {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    for entry in entries {
        let member = find_member(&archive, &entry.filename).ok_or_else(|| {
            ExtractError::MemberMissing {
                archive: archive_path.to_path_buf(),
                filename: entry.filename.clone(),
            }
        })?;
        extract_one(&mut archive, &member, entry)?;
    }

    Ok(entries.len())
}

/// Member name for `filename`: exact match first, then any member whose last
/// path component matches
fn find_member(archive: &ZipArchive<File>, filename: &str) -> Option<String> {
    if archive.index_for_name(filename).is_some() {
        return Some(filename.to_string());
    }
    archive
        .file_names()
        .find(|name| {
            !name.ends_with('/')
                && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(filename)
        })
        .map(str::to_string)
}

fn staging_path(destination: &Path, filename: &str) -> PathBuf {
    destination.with_file_name(format!(".{}.imgfix-partial", filename))
}

fn extract_one(
    archive: &mut ZipArchive<File>,
    member: &str,
    entry: &CorruptImageEntry,
) -> Result<(), ExtractError> {
    let destination = &entry.full_path;
    let write_err = |e: &dyn std::fmt::Display| ExtractError::Write {
        path: destination.clone(),
        reason: e.to_string(),
    };

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(&e))?;
        }
    }

    let staging = staging_path(destination, &entry.filename);
    let staged = (|| -> Result<(), ExtractError> {
        let mut zipped = archive.by_name(member).map_err(|e| write_err(&e))?;
        let out = File::create(&staging).map_err(|e| write_err(&e))?;
        let mut writer = BufWriter::new(out);
        std::io::copy(&mut zipped, &mut writer).map_err(|e| write_err(&e))?;
        let out = writer.into_inner().map_err(|e| write_err(e.error()))?;
        out.sync_all().map_err(|e| write_err(&e))?;

        verify_image(&staging).map_err(|e| ExtractError::Verify {
            path: destination.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    })();

    if let Err(e) = staged {
        let _ = std::fs::remove_file(&staging);
        return Err(e);
    }

    std::fs::rename(&staging, destination).map_err(|e| {
        let _ = std::fs::remove_file(&staging);
        write_err(&e)
    })
}
