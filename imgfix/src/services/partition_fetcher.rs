//! Partition archive fetcher
//!
//! Downloads one partition's archive into the scratch directory. The archive
//! URL is derived from a template by substituting the six-digit zero-padded
//! partition number; the local file is always `part-NNNNNN.zip`.
//!
//! Two transports:
//! - [`Aria2Fetcher`]: external resumable downloader (`aria2c -c`)
//! - [`HttpFetcher`]: in-process HTTP with `Range` resume from a `.partial` file;
//!   a finished archive left in scratch by an earlier attempt is reused
//!
//! Both retry failed attempts with exponential backoff. A fetch failure is
//! reported per partition and never aborts the run.

use async_trait::async_trait;
use imgfix_common::config::{FetchTransport, RepairConfig, PARTITION_PLACEHOLDER};
use imgfix_common::models::PartitionId;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Archive fetch errors (recoverable: the partition stays unfixed)
#[derive(Debug, Error)]
pub enum FetchError {
    /// Downloader executable not found
    #[error("Downloader binary not found: {0}")]
    BinaryNotFound(String),

    /// Downloader ran but reported failure
    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Downloader claimed success but no archive was produced
    #[error("Archive missing after download: {0}")]
    ArchiveMissing(PathBuf),

    /// HTTP transport error
    #[error("HTTP error for {url}: {reason}")]
    Http { url: String, reason: String },

    /// Scratch storage error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retrieves a partition archive to local scratch storage
#[async_trait]
pub trait PartitionFetcher: Send + Sync {
    /// Download the archive for `partition_id`, returning its local path
    async fn fetch(&self, partition_id: PartitionId) -> Result<PathBuf, FetchError>;
}

/// Remote archive URL for a partition
pub fn archive_url(template: &str, partition_id: PartitionId) -> String {
    template.replace(PARTITION_PLACEHOLDER, &partition_id.padded())
}

/// Retry policy shared by both transports
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RepairConfig) -> Self {
        Self {
            max_retries: config.fetch_retries,
            base_delay: config.retry_base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `operation` until it succeeds or every retry has been spent
pub async fn with_retry<F, Fut, T>(
    policy: RetryPolicy,
    partition_id: PartitionId,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            // Missing binary will not fix itself
            Err(e @ FetchError::BinaryNotFound(_)) => return Err(e),
            Err(e) if attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    partition = %partition_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Archive download failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn ensure_scratch_dir(scratch_dir: &Path) -> Result<(), FetchError> {
    tokio::fs::create_dir_all(scratch_dir).await?;
    Ok(())
}

/// Fetcher delegating to the `aria2c` command-line downloader
#[derive(Debug, Clone)]
pub struct Aria2Fetcher {
    binary: String,
    url_template: String,
    scratch_dir: PathBuf,
    retry: RetryPolicy,
}

impl Aria2Fetcher {
    pub fn new(
        binary: impl Into<String>,
        url_template: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            binary: binary.into(),
            url_template: url_template.into(),
            scratch_dir: scratch_dir.into(),
            retry,
        }
    }

    pub fn from_config(config: &RepairConfig) -> Self {
        Self::new(
            config.downloader_binary.clone(),
            config.archive_url_template.clone(),
            config.scratch_dir.clone(),
            RetryPolicy::from_config(config),
        )
    }

    async fn run_once(&self, url: &str, file_name: &str) -> Result<PathBuf, FetchError> {
        let archive_path = self.scratch_dir.join(file_name);

        let output = tokio::task::spawn_blocking({
            let binary = self.binary.clone();
            let url = url.to_string();
            let scratch_dir = self.scratch_dir.clone();
            let file_name = file_name.to_string();

            move || {
                Command::new(&binary)
                    .arg("-c")
                    .arg(&url)
                    .arg("-d")
                    .arg(&scratch_dir)
                    .arg("-o")
                    .arg(&file_name)
                    .output()
            }
        })
        .await
        .map_err(|e| FetchError::DownloadFailed {
            url: url.to_string(),
            reason: format!("Task join error: {}", e),
        })?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::BinaryNotFound(self.binary.clone())
            } else {
                FetchError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::DownloadFailed {
                url: url.to_string(),
                reason: format!(
                    "Exit code: {:?}, stderr: {}",
                    output.status.code(),
                    stderr.trim()
                ),
            });
        }

        if !archive_path.is_file() {
            return Err(FetchError::ArchiveMissing(archive_path));
        }

        Ok(archive_path)
    }
}

#[async_trait]
impl PartitionFetcher for Aria2Fetcher {
    async fn fetch(&self, partition_id: PartitionId) -> Result<PathBuf, FetchError> {
        ensure_scratch_dir(&self.scratch_dir).await?;
        let url = archive_url(&self.url_template, partition_id);
        let file_name = partition_id.archive_file_name();

        info!(partition = %partition_id, url = %url, "Downloading partition archive (aria2c)");
        let path = with_retry(self.retry, partition_id, || self.run_once(&url, &file_name)).await?;
        debug!(partition = %partition_id, archive = %path.display(), "Archive downloaded");
        Ok(path)
    }
}

/// In-process HTTP fetcher with resumable downloads
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url_template: String,
    scratch_dir: PathBuf,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(
        url_template: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template: url_template.into(),
            scratch_dir: scratch_dir.into(),
            retry,
        }
    }

    pub fn from_config(config: &RepairConfig) -> Self {
        Self::new(
            config.archive_url_template.clone(),
            config.scratch_dir.clone(),
            RetryPolicy::from_config(config),
        )
    }

    async fn download_once(&self, url: &str, file_name: &str) -> Result<PathBuf, FetchError> {
        let archive_path = self.scratch_dir.join(file_name);
        let partial_path = self.scratch_dir.join(format!("{}.partial", file_name));

        let resume_from = match tokio::fs::metadata(&partial_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(url);
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={}-", resume_from));
        }

        let http_err = |e: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut response = request.send().await.map_err(http_err)?;
        let status = response.status();

        let append = match status {
            StatusCode::PARTIAL_CONTENT => {
                debug!(url = %url, offset = resume_from, "Resuming partial download");
                true
            }
            StatusCode::RANGE_NOT_SATISFIABLE if resume_from > 0 => {
                // Partial file already holds the whole body
                tokio::fs::rename(&partial_path, &archive_path).await?;
                return Ok(archive_path);
            }
            s if s.is_success() => false,
            s => {
                return Err(FetchError::Http {
                    url: url.to_string(),
                    reason: format!("unexpected status {}", s),
                })
            }
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&partial_path)
            .await?;

        while let Some(chunk) = response.chunk().await.map_err(http_err)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial_path, &archive_path).await?;
        Ok(archive_path)
    }
}

#[async_trait]
impl PartitionFetcher for HttpFetcher {
    async fn fetch(&self, partition_id: PartitionId) -> Result<PathBuf, FetchError> {
        ensure_scratch_dir(&self.scratch_dir).await?;
        let url = archive_url(&self.url_template, partition_id);
        let file_name = partition_id.archive_file_name();

        let kept = self.scratch_dir.join(&file_name);
        if tokio::fs::try_exists(&kept).await.unwrap_or(false) {
            info!(partition = %partition_id, archive = %kept.display(), "Reusing archive from an earlier attempt");
            return Ok(kept);
        }

        info!(partition = %partition_id, url = %url, "Downloading partition archive (http)");
        let path =
            with_retry(self.retry, partition_id, || self.download_once(&url, &file_name)).await?;
        debug!(partition = %partition_id, archive = %path.display(), "Archive downloaded");
        Ok(path)
    }
}

/// Build the fetcher selected by the configuration
pub fn fetcher_from_config(config: &RepairConfig) -> Box<dyn PartitionFetcher> {
    match config.transport {
        FetchTransport::Aria2c => Box::new(Aria2Fetcher::from_config(config)),
        FetchTransport::Http => Box::new(HttpFetcher::from_config(config)),
    }
}
