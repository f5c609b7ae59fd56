//! imgfix - dataset integrity repair
//!
//! Scans the images referenced by an evaluation manifest, groups the corrupt
//! ones by source partition and restores them from the partition archives.
//! Progress is checkpointed, so an interrupted run picks up where it stopped.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use imgfix::config::{resolve_config, ConfigOverrides};
use imgfix::workflow::IndexSource;
use imgfix::RepairPipeline;
use imgfix_common::config::{
    default_config_path, default_toml_config, write_toml_config, CheckpointBackend,
    FetchTransport,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for imgfix
#[derive(Parser, Debug)]
#[command(name = "imgfix")]
#[command(about = "Find corrupt dataset images and restore them from partition archives")]
#[command(version)]
struct Args {
    /// TOML config file (default: ~/.config/imgfix/config.toml)
    #[arg(short, long, env = "IMGFIX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Dataset root all manifest paths are relative to
    #[arg(long, env = "IMGFIX_DATASET_ROOT", global = true)]
    dataset_root: Option<PathBuf>,

    /// Evaluation manifest (JSON)
    #[arg(long, env = "IMGFIX_MANIFEST", global = true)]
    manifest: Option<PathBuf>,

    /// Metadata table mapping image names to partitions (.parquet or .json)
    #[arg(long, env = "IMGFIX_METADATA", global = true)]
    metadata: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long, env = "IMGFIX_CHECKPOINT", global = true)]
    checkpoint: Option<PathBuf>,

    /// Checkpoint format (json, sqlite)
    #[arg(long, env = "IMGFIX_CHECKPOINT_BACKEND", global = true)]
    checkpoint_backend: Option<CheckpointBackend>,

    /// Scratch directory for downloaded archives
    #[arg(long, env = "IMGFIX_SCRATCH_DIR", global = true)]
    scratch_dir: Option<PathBuf>,

    /// Archive URL template containing {partition}
    #[arg(long, env = "IMGFIX_ARCHIVE_URL", global = true)]
    archive_url: Option<String>,

    /// Download transport (aria2c, http)
    #[arg(long, env = "IMGFIX_TRANSPORT", global = true)]
    transport: Option<FetchTransport>,

    /// Downloader executable for the aria2c transport
    #[arg(long, env = "IMGFIX_DOWNLOADER", global = true)]
    downloader: Option<String>,

    /// Extra download attempts per partition
    #[arg(long, env = "IMGFIX_FETCH_RETRIES", global = true)]
    fetch_retries: Option<u32>,

    /// Base delay between download attempts, doubled per retry
    #[arg(long, env = "IMGFIX_RETRY_DELAY_MS", global = true)]
    retry_delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "IMGFIX_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Scan (unless checkpointed), repair, print summary (default)
    Run,
    /// Scan (unless checkpointed) and print the corruption index summary
    Scan,
    /// Print the summary of the existing checkpoint
    Status,
    /// Write a config file populated with the defaults
    InitConfig {
        /// Destination (default: ~/.config/imgfix/config.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            dataset_root: self.dataset_root.clone(),
            manifest_path: self.manifest.clone(),
            metadata_path: self.metadata.clone(),
            checkpoint_path: self.checkpoint.clone(),
            checkpoint_backend: self.checkpoint_backend,
            scratch_dir: self.scratch_dir.clone(),
            archive_url_template: self.archive_url.clone(),
            transport: self.transport,
            downloader_binary: self.downloader.clone(),
            fetch_retries: self.fetch_retries,
            retry_base_delay_ms: self.retry_delay_ms,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.clone().unwrap_or(Command::Run);

    if let Command::InitConfig { path, force } = &command {
        return init_config(path.clone(), *force);
    }

    // Config warnings are emitted before the global subscriber exists
    let startup_logger = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .finish();
    let resolved = tracing::subscriber::with_default(startup_logger, || {
        resolve_config(args.config.as_deref(), &args.overrides())
    })
    .context("Failed to resolve configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| resolved.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("IMGFIX_GIT_HASH"),
        built = env!("IMGFIX_BUILD_TIMESTAMP"),
        profile = env!("IMGFIX_BUILD_PROFILE"),
        "Starting imgfix"
    );
    if let Some(source) = &resolved.source {
        info!("Config file: {}", source.display());
    }
    info!("Dataset root: {}", resolved.repair.dataset_root.display());
    info!("Checkpoint: {}", resolved.repair.checkpoint_path.display());

    let pipeline =
        RepairPipeline::from_config(resolved.repair).context("Invalid configuration")?;

    match command {
        Command::Run => {
            let report = pipeline.run().await.context("Repair run failed")?;
            print!("{}", report.summary);
        }
        Command::Scan => {
            let (index, source) = pipeline.load_or_scan().await.context("Scan failed")?;
            if let IndexSource::Scan(report) = &source {
                println!(
                    "Checked {} images: {} healthy, {} corrupt, {} without a known partition",
                    report.checked,
                    report.healthy,
                    report.corrupt,
                    report.unresolved.len()
                );
            }
            print!("{}", imgfix::RepairSummary::from_index(&index));
        }
        Command::Status => {
            let summary = pipeline.status().await.context("Status failed")?;
            print!("{}", summary);
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path.or_else(default_config_path) {
        Some(path) => path,
        None => bail!("No config directory available; pass a path"),
    };

    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    write_toml_config(&default_toml_config(), &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
