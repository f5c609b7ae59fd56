//! In-process partition fetchers for pipeline tests

use super::fixtures::{write_file, write_zip};
use async_trait::async_trait;
use imgfix::services::{FetchError, PartitionFetcher};
use imgfix_common::models::PartitionId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
enum Archive {
    Members(Vec<(String, Vec<u8>)>),
    /// Written as-is (not a zip container)
    Raw(Vec<u8>),
}

/// Serves archives built from in-memory members, counting fetches
#[derive(Clone)]
pub struct ZipFetcher {
    scratch_dir: PathBuf,
    archives: HashMap<PartitionId, Archive>,
    calls: Arc<Mutex<Vec<PartitionId>>>,
}

impl ZipFetcher {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            archives: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_archive(mut self, partition: u32, members: Vec<(&str, Vec<u8>)>) -> Self {
        self.archives.insert(
            PartitionId::new(partition),
            Archive::Members(
                members
                    .into_iter()
                    .map(|(name, bytes)| (name.to_string(), bytes))
                    .collect(),
            ),
        );
        self
    }

    /// Serve `bytes` verbatim as the partition's archive
    pub fn with_raw_archive(mut self, partition: u32, bytes: Vec<u8>) -> Self {
        self.archives
            .insert(PartitionId::new(partition), Archive::Raw(bytes));
        self
    }

    /// Partitions fetched so far, in call order
    pub fn calls(&self) -> Vec<PartitionId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PartitionFetcher for ZipFetcher {
    async fn fetch(&self, partition_id: PartitionId) -> Result<PathBuf, FetchError> {
        self.calls.lock().unwrap().push(partition_id);

        let archive = self.archives.get(&partition_id).ok_or_else(|| FetchError::DownloadFailed {
            url: format!("test://{}", partition_id.archive_file_name()),
            reason: "404 Not Found".to_string(),
        })?;

        let path = self.scratch_dir.join(partition_id.archive_file_name());
        match archive {
            Archive::Members(members) => {
                let borrowed: Vec<(&str, Vec<u8>)> = members
                    .iter()
                    .map(|(name, bytes)| (name.as_str(), bytes.clone()))
                    .collect();
                write_zip(&path, &borrowed);
            }
            Archive::Raw(bytes) => write_file(&path, bytes),
        }
        Ok(path)
    }
}

/// Always fails, counting attempts
#[derive(Clone, Default)]
pub struct FailingFetcher {
    calls: Arc<Mutex<usize>>,
}

impl FailingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PartitionFetcher for FailingFetcher {
    async fn fetch(&self, partition_id: PartitionId) -> Result<PathBuf, FetchError> {
        *self.calls.lock().unwrap() += 1;
        Err(FetchError::DownloadFailed {
            url: format!("test://{}", partition_id.archive_file_name()),
            reason: "connection refused".to_string(),
        })
    }
}
