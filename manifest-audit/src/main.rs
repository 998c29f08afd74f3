//! Manifest Audit - Main entry point
//!
//! Reconciles backup and filelist inventories, or aggregates a filelist per
//! directory prefix.

use anyhow::Result;
use clap::{Parser, Subcommand};
use manifest_audit::aggregate::{compare_sizes, default_parallelism, load_sizes, AggregationEngine};
use manifest_audit::input::open_input;
use manifest_audit::manifest::{load_index, BackupParser, FileListParser, NumericPolicy, Source};
use manifest_audit::progress::format_bytes;
use manifest_audit::reconcile::writer::write_report;
use manifest_audit::reconcile::{Category, Reconciler};
use manifest_audit::shutdown::ShutdownCoordinator;
use manifest_audit::{utils, AuditError, Config, RunContext, RunOptions};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Paths listed per non-identical category in the reconcile summary
const SAMPLE_PATHS: usize = 5;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare a backup manifest against a filelist manifest
    Reconcile {
        /// Backup manifest (`.zst` is decompressed)
        #[arg(long, value_name = "FILE")]
        backup: PathBuf,

        /// Filelist manifest (`.zst` is decompressed)
        #[arg(long, value_name = "FILE")]
        filelist: PathBuf,

        /// Directory for the category files and summary.json
        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Record unparsable sizes and mtimes as 0 instead of unknown
        #[arg(long)]
        legacy_zero: bool,
    },

    /// Sum filelist sizes per directory prefix below a base path
    Aggregate {
        /// Filelist manifest (`.zst` is decompressed, `-` reads stdin)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Output JSON document
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Absolute directory to aggregate under
        #[arg(long)]
        base_path: String,

        /// Prefix depth (overrides config)
        #[arg(long)]
        depth: Option<usize>,

        /// Worker count (overrides config)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Lines per chunk (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Check two aggregation documents for matching prefixes and sizes
    Compare {
        /// Reference document
        left: PathBuf,

        /// Document checked against the reference
        right: PathBuf,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (file, then MANIFEST_AUDIT__* overrides)
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting manifest-audit v{}", env!("CARGO_PKG_VERSION"));

    let shutdown_coordinator = ShutdownCoordinator::new();
    let cancel = shutdown_coordinator.token();
    let signal_handle = tokio::spawn(async move {
        shutdown_coordinator.wait_for_signal().await;
    });

    let outcome = match args.command {
        Command::Reconcile {
            backup,
            filelist,
            output_dir,
            legacy_zero,
        } => run_reconcile(&config, &backup, &filelist, &output_dir, legacy_zero, cancel).await,
        Command::Aggregate {
            input,
            output,
            base_path,
            depth,
            parallelism,
            chunk_size,
        } => {
            let settings = AggregateArgs {
                depth: depth.unwrap_or(config.aggregate.depth),
                parallelism: parallelism
                    .or(config.aggregate.parallelism)
                    .unwrap_or_else(default_parallelism),
                chunk_size: chunk_size.unwrap_or(config.aggregate.chunk_size),
            };
            run_aggregate(&config, &input, &output, &base_path, settings, cancel).await
        }
        Command::Compare { left, right } => run_compare(&left, &right),
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    };

    signal_handle.abort();
    outcome
}

async fn run_reconcile(
    config: &Config,
    backup: &Path,
    filelist: &Path,
    output_dir: &Path,
    legacy_zero: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let mut options = RunOptions::from(config);
    if legacy_zero {
        options.numeric_policy = NumericPolicy::CoerceZero;
    }
    let policy = options.numeric_policy;
    let mut ctx = RunContext::with_cancel(options, cancel);
    let normalizer = config.normalizer();

    let backup_index = load_index(
        &BackupParser::new(normalizer.clone(), policy),
        open_input(backup).await?,
        &backup.display().to_string(),
        &mut ctx,
    )
    .await?;
    info!("Loaded {} backup entries", backup_index.len());

    let filelist_index = load_index(
        &FileListParser::new(normalizer, policy),
        open_input(filelist).await?,
        &filelist.display().to_string(),
        &mut ctx,
    )
    .await?;
    info!("Loaded {} filelist entries", filelist_index.len());

    let report = Reconciler::new(ctx.options().progress_interval).run(&backup_index, &filelist_index);
    if ctx.is_cancelled() {
        return Err(AuditError::Cancelled.into());
    }

    write_report(&report, &ctx, output_dir)?;

    info!("=== Reconciliation summary ===");
    info!("Backup entries:   {}", report.backup_total);
    info!("Filelist entries: {}", report.filelist_total);
    info!("Distinct paths:   {}", report.union_len());
    for category in Category::ALL {
        info!("  {:<18} {}", category.as_str(), report.counts.get(category));
    }
    for source in [Source::Backup, Source::FileList] {
        let stats = ctx.stats(source);
        info!(
            "  {}: {} malformed, {} unknown size, {} unknown mtime, {} duplicates",
            source, stats.malformed, stats.unknown_size, stats.unknown_mtime, stats.duplicates
        );
    }
    for category in Category::ALL.into_iter().filter(|c| c.is_retained()) {
        let count = report.counts.get(category);
        if count == 0 {
            continue;
        }
        info!("Sample {} paths ({} of {}):", category.as_str(), count.min(SAMPLE_PATHS as u64), count);
        for path in report.sample_paths(category, SAMPLE_PATHS) {
            info!("    {}", path);
        }
    }
    info!("Results written to {}", output_dir.display());
    Ok(())
}

struct AggregateArgs {
    depth: usize,
    parallelism: usize,
    chunk_size: usize,
}

async fn run_aggregate(
    config: &Config,
    input: &Path,
    output: &Path,
    base_path: &str,
    settings: AggregateArgs,
    cancel: CancellationToken,
) -> Result<()> {
    if settings.parallelism == 0 || settings.chunk_size == 0 {
        return Err(AuditError::Config("parallelism and chunk size must be at least 1".to_string()).into());
    }

    let engine = AggregationEngine::new(base_path, settings.depth)?
        .with_parallelism(settings.parallelism)
        .with_chunk_size(settings.chunk_size)
        .with_progress_interval(config.parse.progress_interval)
        .with_source_name(input.display().to_string())
        .with_cancel(cancel);

    let report = engine.run(open_input(input).await?).await?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    report.write_to(output)?;

    info!("=== Aggregation summary ===");
    info!(
        "{} files, {} in {} directories",
        report.summary.total_files,
        format_bytes(report.summary.total_bytes),
        report.summary.total_directories
    );

    let mut top: Vec<_> = report.aggregates().filter(|a| a.depth() == 1).collect();
    top.sort_by(|a, b| b.total_size().cmp(&a.total_size()).then_with(|| a.prefix().cmp(b.prefix())));
    for row in top.iter().take(10) {
        info!(
            "  {:<40} {:>12} ({} files)",
            row.prefix(),
            format_bytes(row.total_size()),
            row.file_count()
        );
    }

    let skipped = report.skipped;
    info!(
        "Skipped {} lines ({} malformed, {} not absolute, {} invalid size, {} outside base)",
        skipped.total(),
        skipped.malformed,
        skipped.not_absolute,
        skipped.invalid_size,
        skipped.outside_base
    );
    info!("Results written to {}", output.display());
    Ok(())
}

fn run_compare(left: &Path, right: &Path) -> Result<()> {
    let comparison = compare_sizes(&load_sizes(left)?, &load_sizes(right)?);

    if !comparison.only_left.is_empty() {
        warn!("{} prefixes found only in {}", comparison.only_left.len(), left.display());
        for prefix in &comparison.only_left {
            warn!("  {}", prefix);
        }
    }
    if !comparison.only_right.is_empty() {
        warn!("{} prefixes found only in {}", comparison.only_right.len(), right.display());
        for prefix in &comparison.only_right {
            warn!("  {}", prefix);
        }
    }
    if !comparison.size_differences.is_empty() {
        warn!("{} prefixes with different total_size", comparison.size_differences.len());
        for diff in &comparison.size_differences {
            warn!(
                "  {}: {} vs {} (diff {})",
                diff.prefix,
                diff.left,
                diff.right,
                diff.delta()
            );
        }
    }

    if !comparison.is_match() {
        anyhow::bail!("{} and {} differ", left.display(), right.display());
    }
    info!("All prefixes and sizes match");
    Ok(())
}
