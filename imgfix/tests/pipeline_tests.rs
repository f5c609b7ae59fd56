//! End-to-end tests for the scan-then-repair pipeline
//!
//! Every test builds a throwaway dataset (manifest, metadata table, images)
//! in a temp directory and drives `RepairPipeline` with in-process fetchers.

mod helpers;

use async_trait::async_trait;
use helpers::{
    corrupt_png_bytes, png_bytes, test_config, write_manifest, write_metadata_json,
    FailingFetcher, ZipFetcher,
};
use imgfix::checkpoint::{CheckpointError, CheckpointStore, JsonCheckpointStore, SqliteCheckpointStore};
use imgfix::services::{verify_image, PartitionFetcher};
use imgfix::workflow::IndexSource;
use imgfix::{RepairError, RepairPipeline};
use imgfix_common::config::{CheckpointBackend, RepairConfig};
use imgfix_common::models::{CorruptionIndex, PartitionId};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// img1 healthy (partition 1), img2 corrupt (partition 5), img3 corrupt and
/// absent from the metadata table
fn scenario(root: &Path) -> RepairConfig {
    let config = test_config(root);
    let images = config.dataset_root.join("imgs");
    helpers::fixtures::write_file(&images.join("img1.png"), &png_bytes(1));
    helpers::fixtures::write_file(&images.join("img2.png"), &corrupt_png_bytes(2));
    helpers::fixtures::write_file(&images.join("img3.png"), b"garbage");

    write_manifest(
        &config.manifest_path,
        &["imgs/img1.png", "imgs/img2.png", "imgs/img3.png"],
    );
    write_metadata_json(&config.metadata_path, &[("img1.png", 1), ("img2.png", 5)]);
    config
}

fn pipeline(config: &RepairConfig, fetcher: impl PartitionFetcher + 'static) -> RepairPipeline {
    let store: Box<dyn CheckpointStore> = match config.checkpoint_backend {
        CheckpointBackend::Json => Box::new(JsonCheckpointStore::new(&config.checkpoint_path)),
        CheckpointBackend::Sqlite => Box::new(SqliteCheckpointStore::new(&config.checkpoint_path)),
    };
    RepairPipeline::with_components(config.clone(), store, Box::new(fetcher))
}

async fn persisted(config: &RepairConfig) -> CorruptionIndex {
    JsonCheckpointStore::new(&config.checkpoint_path)
        .load()
        .await
        .unwrap()
        .expect("checkpoint written")
}

#[tokio::test]
async fn test_scan_builds_expected_index() {
    let temp = TempDir::new().unwrap();
    let config = scenario(temp.path());
    let pipeline = pipeline(&config, FailingFetcher::new());

    let (index, source) = pipeline.load_or_scan().await.unwrap();

    let report = match source {
        IndexSource::Scan(report) => report,
        IndexSource::Checkpoint => panic!("expected a scan"),
    };
    assert_eq!(report.healthy, 1);
    assert_eq!(report.corrupt, 2);
    assert_eq!(
        report.unresolved,
        vec![config.dataset_root.join("imgs/img3.png")]
    );

    assert_eq!(index.len(), 1);
    let state = index.get(PartitionId::new(5)).unwrap();
    assert!(!state.fixed);
    assert_eq!(state.images.len(), 1);
    assert_eq!(state.images[0].filename, "img2.png");
    assert_eq!(
        state.images[0].full_path,
        config.dataset_root.join("imgs/img2.png")
    );

    assert_eq!(persisted(&config).await, index);
}

#[tokio::test]
async fn test_second_scan_uses_checkpoint_without_inputs() {
    let temp = TempDir::new().unwrap();
    let config = scenario(temp.path());

    let (first, _) = pipeline(&config, FailingFetcher::new())
        .load_or_scan()
        .await
        .unwrap();

    // A rescan would fail without these
    std::fs::remove_file(&config.metadata_path).unwrap();
    std::fs::remove_file(&config.manifest_path).unwrap();

    let (second, source) = pipeline(&config, FailingFetcher::new())
        .load_or_scan()
        .await
        .unwrap();
    assert!(matches!(source, IndexSource::Checkpoint));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_full_run_repairs_partition() {
    let temp = TempDir::new().unwrap();
    let config = scenario(temp.path());
    let fetcher = ZipFetcher::new(&config.scratch_dir)
        .with_archive(5, vec![("img2.png", png_bytes(2)), ("other.png", png_bytes(9))]);

    let report = pipeline(&config, fetcher.clone()).run().await.unwrap();

    assert_eq!(fetcher.calls(), vec![PartitionId::new(5)]);
    assert_eq!(report.repair.fixed_count(), 1);
    assert!(report.summary.is_complete());
    assert_eq!(report.summary.to_string().lines().next(), Some("Part-5: fixed"));

    let img2 = config.dataset_root.join("imgs/img2.png");
    assert!(verify_image(&img2).is_ok());
    assert_eq!(std::fs::read(&img2).unwrap(), png_bytes(2));

    // Only listed members are extracted; scratch archive is gone
    assert!(!config.dataset_root.join("imgs/other.png").exists());
    assert!(!config.scratch_dir.join("part-000005.zip").exists());

    assert!(persisted(&config).await.get(PartitionId::new(5)).unwrap().fixed);
}

#[tokio::test]
async fn test_fetch_failure_on_two_runs_leaves_partition_unfixed() {
    let temp = TempDir::new().unwrap();
    let config = scenario(temp.path());
    let fetcher = FailingFetcher::new();

    let first = pipeline(&config, fetcher.clone()).run().await.unwrap();
    let after_first = persisted(&config).await;
    let second = pipeline(&config, fetcher.clone()).run().await.unwrap();
    let after_second = persisted(&config).await;

    assert_eq!(fetcher.calls(), 2);
    assert_eq!(first.repair.failed_count(), 1);
    assert_eq!(second.repair.failed_count(), 1);
    assert_eq!(after_first, after_second);

    let state = after_second.get(PartitionId::new(5)).unwrap();
    assert!(!state.fixed);
    assert_eq!(state.images.len(), 1);
    assert_eq!(
        second.summary.to_string().lines().next(),
        Some("Part-5: 1 images not fixed")
    );
}

#[tokio::test]
async fn test_fixed_partitions_never_refetched() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let images = config.dataset_root.join("imgs");
    helpers::fixtures::write_file(&images.join("a.png"), &corrupt_png_bytes(1));
    helpers::fixtures::write_file(&images.join("b.png"), &corrupt_png_bytes(2));
    write_manifest(&config.manifest_path, &["imgs/a.png", "imgs/b.png"]);
    write_metadata_json(&config.metadata_path, &[("a.png", 3), ("b.png", 8)]);

    // First run: only partition 3 is downloadable
    let partial = ZipFetcher::new(&config.scratch_dir).with_archive(3, vec![("a.png", png_bytes(1))]);
    pipeline(&config, partial.clone()).run().await.unwrap();
    assert_eq!(partial.calls(), vec![PartitionId::new(3), PartitionId::new(8)]);

    // Second run: both available, only 8 is fetched
    let full = ZipFetcher::new(&config.scratch_dir)
        .with_archive(3, vec![("a.png", png_bytes(1))])
        .with_archive(8, vec![("b.png", png_bytes(2))]);
    let report = pipeline(&config, full.clone()).run().await.unwrap();

    assert_eq!(full.calls(), vec![PartitionId::new(8)]);
    assert_eq!(report.repair.skipped_fixed, 1);
    assert!(report.summary.is_complete());
}

/// Store that stops accepting writes after `limit` saves, standing in for a
/// process killed mid-run
struct InterruptingStore {
    inner: JsonCheckpointStore,
    saves: AtomicUsize,
    limit: usize,
}

#[async_trait]
impl CheckpointStore for InterruptingStore {
    async fn load(&self) -> Result<Option<CorruptionIndex>, CheckpointError> {
        self.inner.load().await
    }

    async fn save(&self, index: &CorruptionIndex) -> Result<(), CheckpointError> {
        if self.saves.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return Err(CheckpointError::Save {
                path: self.inner.location().to_path_buf(),
                reason: "interrupted".to_string(),
            });
        }
        self.inner.save(index).await
    }

    fn location(&self) -> &Path {
        self.inner.location()
    }
}

#[tokio::test]
async fn test_resume_after_interruption_between_partitions() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let images = config.dataset_root.join("imgs");
    helpers::fixtures::write_file(&images.join("a.png"), &corrupt_png_bytes(1));
    helpers::fixtures::write_file(&images.join("b.png"), &corrupt_png_bytes(2));
    write_manifest(&config.manifest_path, &["imgs/a.png", "imgs/b.png"]);
    write_metadata_json(&config.metadata_path, &[("a.png", 1), ("b.png", 2)]);

    let fetcher = ZipFetcher::new(&config.scratch_dir)
        .with_archive(1, vec![("a.png", png_bytes(1))])
        .with_archive(2, vec![("b.png", png_bytes(2))]);

    // Saves: scan, partition 1, then partition 2 is refused
    let store = InterruptingStore {
        inner: JsonCheckpointStore::new(&config.checkpoint_path),
        saves: AtomicUsize::new(0),
        limit: 2,
    };
    let interrupted = RepairPipeline::with_components(
        config.clone(),
        Box::new(store),
        Box::new(fetcher.clone()),
    );
    let err = interrupted.run().await.unwrap_err();
    assert!(matches!(err, RepairError::Checkpoint(CheckpointError::Save { .. })));

    let on_disk = persisted(&config).await;
    assert!(on_disk.get(PartitionId::new(1)).unwrap().fixed);
    assert!(!on_disk.get(PartitionId::new(2)).unwrap().fixed);

    let resumed = ZipFetcher::new(&config.scratch_dir)
        .with_archive(1, vec![("a.png", png_bytes(1))])
        .with_archive(2, vec![("b.png", png_bytes(2))]);
    let report = pipeline(&config, resumed.clone()).run().await.unwrap();

    assert_eq!(resumed.calls(), vec![PartitionId::new(2)]);
    assert!(report.summary.is_complete());
}

#[tokio::test]
async fn test_sqlite_backend_end_to_end() {
    let temp = TempDir::new().unwrap();
    let mut config = scenario(temp.path());
    config.checkpoint_backend = CheckpointBackend::Sqlite;
    config.checkpoint_path = config.dataset_root.join("corrupt_images.db");

    let fetcher = ZipFetcher::new(&config.scratch_dir).with_archive(5, vec![("img2.png", png_bytes(2))]);
    let report = pipeline(&config, fetcher).run().await.unwrap();
    assert!(report.summary.is_complete());

    let summary = pipeline(&config, FailingFetcher::new()).status().await.unwrap();
    assert_eq!(summary, report.summary);
}

#[tokio::test]
async fn test_status_without_checkpoint_is_error() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let err = pipeline(&config, FailingFetcher::new()).status().await.unwrap_err();
    assert!(matches!(err, RepairError::NoCheckpoint(p) if p == config.checkpoint_path));
}

#[tokio::test]
async fn test_missing_metadata_is_fatal() {
    let temp = TempDir::new().unwrap();
    let config = scenario(temp.path());
    std::fs::remove_file(&config.metadata_path).unwrap();

    let err = pipeline(&config, FailingFetcher::new()).run().await.unwrap_err();
    assert!(matches!(err, RepairError::MetadataLoad(_)));
    assert!(!config.checkpoint_path.exists());
}

#[tokio::test]
async fn test_missing_manifest_is_fatal() {
    let temp = TempDir::new().unwrap();
    let config = scenario(temp.path());
    std::fs::remove_file(&config.manifest_path).unwrap();

    let err = pipeline(&config, FailingFetcher::new()).run().await.unwrap_err();
    assert!(matches!(err, RepairError::Common(imgfix_common::Error::Manifest { .. })));
}

#[tokio::test]
async fn test_unreadable_checkpoint_is_fatal() {
    let temp = TempDir::new().unwrap();
    let config = scenario(temp.path());
    helpers::fixtures::write_file(&config.checkpoint_path, b"{\"5\": [");

    let err = pipeline(&config, FailingFetcher::new()).run().await.unwrap_err();
    assert!(matches!(err, RepairError::Checkpoint(CheckpointError::Load { .. })));
}

#[test]
fn test_from_config_rejects_invalid_template() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path());
    config.archive_url_template = "http://host/no-placeholder.zip".to_string();

    assert!(matches!(
        RepairPipeline::from_config(config),
        Err(RepairError::Common(imgfix_common::Error::Config(_)))
    ));
}
