//! Repair pipeline orchestrator
//!
//! Wires the components together for one run:
//! - **Load**: consult the checkpoint; if present, the scan is skipped
//! - **Scan**: load manifest and metadata, verify every image, persist the index
//! - **Repair**: drain unfixed partitions, persisting after each
//!
//! # Error Handling
//! - Fatal: metadata load, manifest load, checkpoint load/save, unclassifiable
//!   verification failures
//! - Per-partition fetch and extraction failures are logged and leave the
//!   partition unfixed for the next run
//!
//! # Example
//! ```rust,ignore
//! let pipeline = RepairPipeline::from_config(config)?;
//! let report = pipeline.run().await?;
//! println!("{}", report.summary);
//! ```

use super::summary::RepairSummary;
use crate::checkpoint::{open_store, CheckpointStore};
use crate::error::{RepairError, RepairResult};
use crate::services::{
    fetcher_from_config, IntegrityScanner, MetadataResolver, PartitionFetcher, RepairExecutor,
    RepairOutcome, ScanReport,
};
use imgfix_common::config::RepairConfig;
use imgfix_common::models::{load_manifest, CorruptionIndex};
use std::sync::Arc;
use tracing::info;

/// Where the corruption index of this run came from
#[derive(Debug, Clone)]
pub enum IndexSource {
    /// Loaded from an existing checkpoint; no scan performed
    Checkpoint,
    /// Built by scanning the dataset
    Scan(ScanReport),
}

/// Result of a full run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: IndexSource,
    pub repair: RepairOutcome,
    pub summary: RepairSummary,
}

/// Scan-then-repair pipeline over one dataset
pub struct RepairPipeline {
    config: RepairConfig,
    store: Box<dyn CheckpointStore>,
    fetcher: Box<dyn PartitionFetcher>,
    executor: RepairExecutor,
}

impl RepairPipeline {
    /// Build the pipeline with the backends selected in `config`
    pub fn from_config(config: RepairConfig) -> RepairResult<Self> {
        config.validate()?;
        let store = open_store(&config);
        let fetcher = fetcher_from_config(&config);
        Ok(Self::with_components(config, store, fetcher))
    }

    /// Build the pipeline around caller-supplied backends
    pub fn with_components(
        config: RepairConfig,
        store: Box<dyn CheckpointStore>,
        fetcher: Box<dyn PartitionFetcher>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            executor: RepairExecutor::new(),
        }
    }

    /// Return the persisted index, scanning the dataset only if none exists
    pub async fn load_or_scan(&self) -> RepairResult<(CorruptionIndex, IndexSource)> {
        if let Some(index) = self.store.load().await? {
            info!(
                checkpoint = %self.store.location().display(),
                partitions = index.len(),
                images = index.total_images(),
                "Checkpoint found; skipping scan"
            );
            return Ok((index, IndexSource::Checkpoint));
        }

        info!(
            checkpoint = %self.store.location().display(),
            "No checkpoint; scanning dataset"
        );

        let references = load_manifest(&self.config.manifest_path)?;

        let metadata_path = self.config.metadata_path.clone();
        let resolver = tokio::task::spawn_blocking(move || MetadataResolver::load(&metadata_path))
            .await
            .map_err(|e| RepairError::Task(e.to_string()))??;

        let scanner = IntegrityScanner::new(&self.config.dataset_root);
        let report = scanner
            .scan_blocking(references, Arc::new(resolver))
            .await?;

        self.store.save(&report.index).await?;
        info!(
            checkpoint = %self.store.location().display(),
            "Corruption index saved"
        );

        Ok((report.index.clone(), IndexSource::Scan(report)))
    }

    /// Repair every unfixed partition of `index`
    pub async fn repair(&self, index: &mut CorruptionIndex) -> RepairResult<RepairOutcome> {
        let outcome = self
            .executor
            .repair_all(index, self.fetcher.as_ref(), self.store.as_ref())
            .await?;
        Ok(outcome)
    }

    /// Full run: load-or-scan, repair, summarize
    pub async fn run(&self) -> RepairResult<RunReport> {
        let (mut index, source) = self.load_or_scan().await?;
        let repair = self.repair(&mut index).await?;
        let summary = RepairSummary::from_index(&index);

        info!(
            fixed = summary.fixed_partitions(),
            partitions = summary.partitions.len(),
            broken_images = summary.broken_images(),
            unfixed_images = index.unfixed_images(),
            "Run complete"
        );

        Ok(RunReport {
            source,
            repair,
            summary,
        })
    }

    /// Summary of the persisted checkpoint, without scanning or repairing
    pub async fn status(&self) -> RepairResult<RepairSummary> {
        match self.store.load().await? {
            Some(index) => Ok(RepairSummary::from_index(&index)),
            None => Err(RepairError::NoCheckpoint(
                self.store.location().to_path_buf(),
            )),
        }
    }
}
