//! Configuration resolution for imgfix
//!
//! Priority: CLI flag → environment variable → TOML file → compiled default.
//!
//! The first two tiers arrive together as [`ConfigOverrides`] (the argument
//! parser reads both); they are folded into the TOML layer before the
//! [`RepairConfig`] is derived, so paths anchored at `dataset_root` follow an
//! overridden root unless they were set explicitly.

use imgfix_common::config::{
    default_config_path, load_toml_config, CheckpointBackend, FetchTransport, LoggingConfig,
    RepairConfig, TomlConfig,
};
use imgfix_common::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Values supplied on the command line or through `IMGFIX_*` variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub dataset_root: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_backend: Option<CheckpointBackend>,
    pub scratch_dir: Option<PathBuf>,
    pub archive_url_template: Option<String>,
    pub transport: Option<FetchTransport>,
    pub downloader_binary: Option<String>,
    pub fetch_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Replace TOML values with every override that is set
    pub fn apply_to(&self, toml: &mut TomlConfig) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set(&mut toml.dataset_root, &self.dataset_root);
        set(&mut toml.manifest_path, &self.manifest_path);
        set(&mut toml.metadata_path, &self.metadata_path);
        set(&mut toml.checkpoint_path, &self.checkpoint_path);
        set(&mut toml.checkpoint_backend, &self.checkpoint_backend);
        set(&mut toml.scratch_dir, &self.scratch_dir);
        set(&mut toml.archive_url_template, &self.archive_url_template);
        set(&mut toml.transport, &self.transport);
        set(&mut toml.downloader_binary, &self.downloader_binary);
        set(&mut toml.fetch_retries, &self.fetch_retries);
        set(&mut toml.retry_base_delay_ms, &self.retry_base_delay_ms);
        if let Some(level) = &self.log_level {
            toml.logging.level = level.clone();
        }
    }
}

/// Fully resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub repair: RepairConfig,
    pub logging: LoggingConfig,
    /// TOML file that contributed, if one was found
    pub source: Option<PathBuf>,
}

/// Resolve the run configuration from all tiers
///
/// `config_path` selects the TOML file; without it the per-user default
/// location is tried. A missing file falls back to compiled defaults; an
/// unparsable one is an error.
pub fn resolve_config(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let path = config_path.map(Path::to_path_buf).or_else(default_config_path);

    let (mut toml, source) = match &path {
        Some(p) => match load_toml_config(p)? {
            Some(toml) => (toml, Some(p.clone())),
            None => (TomlConfig::default(), None),
        },
        None => {
            warn!("No config directory available; using compiled defaults");
            (TomlConfig::default(), None)
        }
    };

    if overrides.dataset_root.is_some() && toml.dataset_root.is_some() {
        debug!("dataset_root set in TOML and on command line/environment; using the latter");
    }
    overrides.apply_to(&mut toml);

    let repair = RepairConfig::from_toml(&toml);
    repair.validate()?;

    match &source {
        Some(p) => info!("Configuration loaded from {}", p.display()),
        None => info!("Configuration: compiled defaults and overrides"),
    }

    Ok(ResolvedConfig {
        repair,
        logging: toml.logging,
        source,
    })
}
