//! Configuration loading and defaults
//!
//! Settings are layered with the following priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Layers 1 and 2 are handled by the binary's argument parser; this module owns
//! the TOML file format, the compiled defaults and the resolved [`RepairConfig`]
//! that every pipeline component receives at construction.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Placeholder replaced by the zero-padded partition number in archive URLs
pub const PARTITION_PLACEHOLDER: &str = "{partition}";

/// Remote layout of the DiffusionDB large partition archives
pub const DEFAULT_ARCHIVE_URL_TEMPLATE: &str = "https://hf-mirror.com/datasets/poloclub/diffusiondb/resolve/main/diffusiondb-large-part-1/part-{partition}.zip";

/// Archive transfer mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchTransport {
    /// External resumable downloader invoked as a subprocess
    #[default]
    Aria2c,
    /// In-process HTTP download with Range-based resume
    Http,
}

impl fmt::Display for FetchTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTransport::Aria2c => write!(f, "aria2c"),
            FetchTransport::Http => write!(f, "http"),
        }
    }
}

impl FromStr for FetchTransport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aria2c" | "aria2" => Ok(FetchTransport::Aria2c),
            "http" | "https" => Ok(FetchTransport::Http),
            other => Err(format!("unknown transport '{}' (expected aria2c or http)", other)),
        }
    }
}

/// Durable format of the corruption index checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// Pretty-printed JSON document (diff-friendly, compatible with older checkpoints)
    #[default]
    Json,
    /// Embedded SQLite database
    Sqlite,
}

impl CheckpointBackend {
    /// File name used when no checkpoint path is configured
    pub fn default_file_name(&self) -> &'static str {
        match self {
            CheckpointBackend::Json => "corrupt_images.json",
            CheckpointBackend::Sqlite => "corrupt_images.db",
        }
    }
}

impl fmt::Display for CheckpointBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointBackend::Json => write!(f, "json"),
            CheckpointBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for CheckpointBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(CheckpointBackend::Json),
            "sqlite" | "sqlite3" => Ok(CheckpointBackend::Sqlite),
            other => Err(format!("unknown checkpoint backend '{}' (expected json or sqlite)", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// On-disk TOML configuration
///
/// Every field is optional; anything left out falls back to [`CompiledDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_root: Option<PathBuf>,

    /// Evaluation manifest (defaults to `<dataset_root>/train.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<PathBuf>,

    /// Checkpoint location (defaults to `<dataset_root>/corrupt_images.{json,db}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_backend: Option<CheckpointBackend>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_url_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<FetchTransport>,

    /// Downloader executable for the aria2c transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloader_binary: Option<String>,

    /// Extra attempts after a failed archive download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Compiled fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub dataset_root: PathBuf,
    pub metadata_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub archive_url_template: String,
    pub transport: FetchTransport,
    pub checkpoint_backend: CheckpointBackend,
    pub downloader_binary: String,
    pub fetch_retries: u32,
    pub retry_base_delay_ms: u64,
    pub log_level: String,
}

impl Default for CompiledDefaults {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("data/imagereward"),
            metadata_path: PathBuf::from("ImageRewardDB/raw/metadata-large.parquet"),
            scratch_dir: PathBuf::from("./tmp"),
            archive_url_template: DEFAULT_ARCHIVE_URL_TEMPLATE.to_string(),
            transport: FetchTransport::Aria2c,
            checkpoint_backend: CheckpointBackend::Json,
            downloader_binary: "aria2c".to_string(),
            fetch_retries: 2,
            retry_base_delay_ms: 5_000,
            log_level: default_log_level(),
        }
    }
}

/// Fully resolved pipeline configuration
///
/// Passed explicitly into each component; nothing in the pipeline reads
/// process-global state.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairConfig {
    /// Root under which every dataset-relative image path resolves
    pub dataset_root: PathBuf,
    pub manifest_path: PathBuf,
    pub metadata_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub checkpoint_backend: CheckpointBackend,
    /// Transient archive downloads
    pub scratch_dir: PathBuf,
    pub archive_url_template: String,
    pub transport: FetchTransport,
    pub downloader_binary: String,
    pub fetch_retries: u32,
    pub retry_base_delay: Duration,
}

impl RepairConfig {
    /// Compiled defaults anchored at `dataset_root`
    pub fn with_dataset_root(dataset_root: impl Into<PathBuf>) -> Self {
        let defaults = CompiledDefaults::default();
        let dataset_root = dataset_root.into();
        Self {
            manifest_path: dataset_root.join("train.json"),
            checkpoint_path: dataset_root.join(defaults.checkpoint_backend.default_file_name()),
            dataset_root,
            metadata_path: defaults.metadata_path,
            checkpoint_backend: defaults.checkpoint_backend,
            scratch_dir: defaults.scratch_dir,
            archive_url_template: defaults.archive_url_template,
            transport: defaults.transport,
            downloader_binary: defaults.downloader_binary,
            fetch_retries: defaults.fetch_retries,
            retry_base_delay: Duration::from_millis(defaults.retry_base_delay_ms),
        }
    }

    /// Apply a TOML file on top of the compiled defaults
    ///
    /// Paths derived from the dataset root (manifest, checkpoint) follow the
    /// TOML's `dataset_root` unless set explicitly.
    pub fn from_toml(toml: &TomlConfig) -> Self {
        let defaults = CompiledDefaults::default();
        let dataset_root = toml
            .dataset_root
            .clone()
            .unwrap_or(defaults.dataset_root);
        let backend = toml.checkpoint_backend.unwrap_or(defaults.checkpoint_backend);

        Self {
            manifest_path: toml
                .manifest_path
                .clone()
                .unwrap_or_else(|| dataset_root.join("train.json")),
            checkpoint_path: toml
                .checkpoint_path
                .clone()
                .unwrap_or_else(|| dataset_root.join(backend.default_file_name())),
            dataset_root,
            metadata_path: toml.metadata_path.clone().unwrap_or(defaults.metadata_path),
            checkpoint_backend: backend,
            scratch_dir: toml.scratch_dir.clone().unwrap_or(defaults.scratch_dir),
            archive_url_template: toml
                .archive_url_template
                .clone()
                .unwrap_or(defaults.archive_url_template),
            transport: toml.transport.unwrap_or(defaults.transport),
            downloader_binary: toml
                .downloader_binary
                .clone()
                .unwrap_or(defaults.downloader_binary),
            fetch_retries: toml.fetch_retries.unwrap_or(defaults.fetch_retries),
            retry_base_delay: Duration::from_millis(
                toml.retry_base_delay_ms.unwrap_or(defaults.retry_base_delay_ms),
            ),
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.archive_url_template.contains(PARTITION_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "archive_url_template must contain {}: {}",
                PARTITION_PLACEHOLDER, self.archive_url_template
            )));
        }
        if self.downloader_binary.trim().is_empty() && self.transport == FetchTransport::Aria2c {
            return Err(Error::Config("downloader_binary must not be empty".to_string()));
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(Error::Config("scratch_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Default configuration file location (`~/.config/imgfix/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("imgfix").join("config.toml"))
}

/// Load TOML configuration
///
/// A missing file is not an error: callers fall back to compiled defaults.
/// A file that exists but does not parse is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<Option<TomlConfig>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Config file not found: {} (using defaults)", path.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(Error::Config(format!(
                "Read TOML failed for {}: {}",
                path.display(),
                e
            )))
        }
    };

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed for {}: {}", path.display(), e)))?;

    debug!("Loaded config from {}", path.display());
    Ok(Some(config))
}

/// Write TOML configuration atomically (temp file + rename)
///
/// On Unix the resulting file is restricted to the owner (0600).
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

/// Config file written by `init-config`: compiled defaults spelled out
pub fn default_toml_config() -> TomlConfig {
    let defaults = CompiledDefaults::default();
    TomlConfig {
        manifest_path: Some(defaults.dataset_root.join("train.json")),
        checkpoint_path: Some(
            defaults
                .dataset_root
                .join(defaults.checkpoint_backend.default_file_name()),
        ),
        dataset_root: Some(defaults.dataset_root),
        metadata_path: Some(defaults.metadata_path),
        checkpoint_backend: Some(defaults.checkpoint_backend),
        scratch_dir: Some(defaults.scratch_dir),
        archive_url_template: Some(defaults.archive_url_template),
        transport: Some(defaults.transport),
        downloader_binary: Some(defaults.downloader_binary),
        fetch_retries: Some(defaults.fetch_retries),
        retry_base_delay_ms: Some(defaults.retry_base_delay_ms),
        logging: LoggingConfig {
            level: defaults.log_level,
        },
    }
}
