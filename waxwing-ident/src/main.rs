//! waxwing - multi-source audio identification and organization
//!
//! CLI front end over the identification engine: scans a music folder,
//! drives a cancellable batch through the source pipeline, prints the
//! results manifest, and optionally organizes resolved files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use waxwing_common::config::{self, TomlConfig};
use waxwing_common::events::{BatchEvent, EventBus};
use waxwing_ident::batch::BatchCoordinator;
use waxwing_ident::cache::FingerprintCache;
use waxwing_ident::config::IdentifyConfig;
use waxwing_ident::organizer::{Organizer, DEFAULT_PATTERN};
use waxwing_ident::probe::{CorruptionGuard, SymphoniaInspector};
use waxwing_ident::scanner::FileScanner;
use waxwing_ident::sources::build_adapters;
use waxwing_ident::types::ResolutionStatus;

#[derive(Parser)]
#[command(name = "waxwing", version, about = "Identify and organize audio files")]
struct Cli {
    /// Music root folder (overrides config and environment)
    #[arg(long, global = true)]
    root: Option<String>,

    /// Config file path (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio files under the root folder
    Scan,
    /// Run the identification pipeline over the root folder
    Identify {
        /// Organize resolved files after identification
        #[arg(long)]
        organize: bool,
        /// Plan moves but do not touch the filesystem
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let toml_config = match &cli.config {
        Some(path) => Some(config::load_toml_config(path)?),
        None => config::load_default_config()?,
    };
    let toml_config = toml_config.unwrap_or_default();

    init_tracing(&toml_config)?;
    info!("waxwing {}", env!("CARGO_PKG_VERSION"));

    let root = config::resolve_root_folder(cli.root.as_deref(), Some(&toml_config))?;
    info!(root = %root.display(), "music root folder");

    match cli.command {
        Command::Scan => run_scan(&root),
        Command::Identify { organize, dry_run } => {
            run_identify(&root, &toml_config, organize, dry_run).await
        }
    }
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn run_scan(root: &std::path::Path) -> Result<()> {
    let result = FileScanner::new().scan(root).context("scan failed")?;

    for file in &result.files {
        println!("{}", file.path.display());
    }
    println!();
    println!(
        "{} audio files, {:.1} MB total",
        result.files.len(),
        result.total_size as f64 / 1_000_000.0
    );
    let mut formats: Vec<_> = result.by_format.iter().collect();
    formats.sort_by(|a, b| b.1.cmp(a.1));
    for (format, count) in formats {
        println!("  {format}: {count}");
    }
    for error in &result.errors {
        warn!(error = %error, "scan problem");
    }
    Ok(())
}

async fn run_identify(
    root: &std::path::Path,
    toml_config: &TomlConfig,
    organize: bool,
    dry_run: bool,
) -> Result<()> {
    let config = IdentifyConfig::from_toml(toml_config);
    let scan = FileScanner::new().scan(root).context("scan failed")?;
    if scan.files.is_empty() {
        println!("No audio files found under {}", root.display());
        return Ok(());
    }
    info!(files = scan.files.len(), "starting identification batch");

    let versions = config.adapter_versions();
    let cache = match &config.cache.path {
        Some(path) => {
            FingerprintCache::open(
                path,
                versions,
                config.cache.max_entries,
                config.cache.max_age_days,
            )
            .await
        }
        None => FingerprintCache::in_memory(versions),
    };

    let adapters = build_adapters(&config);
    let events = EventBus::new(256);
    let inspector = Arc::new(SymphoniaInspector::new(CorruptionGuard::default()));
    let coordinator = BatchCoordinator::new(config, cache, adapters, inspector, events.clone());

    // Ctrl-C requests cooperative cancellation; in-flight calls finish,
    // nothing new starts.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cancellation requested, finishing in-flight work");
                cancel.cancel();
            }
        });
    }

    // Drain progress events into log lines
    let mut rx = events.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let BatchEvent::FileCompleted {
                path,
                status,
                processed,
                total,
                ..
            } = event
            {
                info!(%path, %status, "{processed}/{total}");
            }
        }
    });

    let report = coordinator.run(scan.files, cancel).await;
    progress.abort();

    println!();
    println!("Results for batch {}:", report.batch_id);
    for outcome in &report.outcomes {
        let title = outcome
            .resolution
            .merged
            .title
            .as_ref()
            .map(|f| f.value.as_str())
            .unwrap_or("-");
        let artist = outcome
            .resolution
            .merged
            .artist
            .as_ref()
            .map(|f| f.value.as_str())
            .unwrap_or("-");
        println!(
            "  [{}] {} ({} - {})",
            outcome.resolution.status,
            outcome.path.display(),
            artist,
            title,
        );
        if let ResolutionStatus::Failed { reason } = &outcome.resolution.status {
            println!("       reason: {reason}");
        }
    }
    println!();
    println!(
        "resolved: {}  partially resolved: {}  unresolved: {}  bypassed: {}  failed: {}",
        report.summary.resolved,
        report.summary.partially_resolved,
        report.summary.unresolved,
        report.summary.bypassed,
        report.summary.failed,
    );

    if organize || dry_run {
        let pattern = toml_config
            .organize
            .pattern
            .clone()
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string());
        let target_root = toml_config
            .organize
            .target_root
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| root.to_path_buf());

        let organizer = Organizer::new(pattern, target_root);
        let moves = organizer.plan(&report);
        println!();
        println!("{} files to organize", moves.len());
        let failures = organizer.apply(&moves, dry_run);
        if !failures.is_empty() {
            warn!(failures = failures.len(), "some moves failed");
        }
    }

    Ok(())
}
