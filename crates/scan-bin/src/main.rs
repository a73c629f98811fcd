//! CLI entry point for purity-scan
//!
//! Runs grid scans against the simulated stage, spectrometer and inference
//! service, and exports the purity grid.
//!
//! # Usage
//!
//! ```bash
//! purity-scan run --output scan.json
//! purity-scan run --output scan.csv --batch-size 8
//! purity-scan validate --config config/purity-scan.toml
//! purity-scan config
//! ```
//!
//! Ctrl-C during `run` cancels the scan; the points measured so far are
//! still exported.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use scan_core::{Spectrometer, TravelLimits, XyStage};
use scan_driver_mock::{MockInference, MockSpectrometer, MockStage};
use scan_experiment::{
    ExportFormat, ScanGrid, ScanOrchestrator, ScanParameters, ScanResult, ScanStatus,
    StatusSnapshot,
};
use tokio::signal;
use tracing::{info, warn};

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::logging::TracingConfig;

#[derive(Parser)]
#[command(name = "purity-scan")]
#[command(about = "Two-dimensional spectroscopic purity scans", long_about = None)]
struct Cli {
    /// Configuration file (TOML); missing file means defaults
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured scan on mock hardware
    Run {
        /// Export the result to this file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (json, csv); defaults to the output file extension
        #[arg(long)]
        format: Option<ExportFormat>,

        /// Override `scan.batch_size`
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override `spectrometer.seed` for reproducible spectra
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Check configuration and scan parameters without running
    Validate,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;

    logging::init(TracingConfig::from_app_config(&config).map_err(|e| anyhow!(e))?)
        .map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Run {
            output,
            format,
            batch_size,
            seed,
        } => run_scan(config, output, format, batch_size, seed).await,
        Commands::Validate => validate_scan(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run_scan(
    mut config: AppConfig,
    output: Option<PathBuf>,
    format: Option<ExportFormat>,
    batch_size: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    if let Some(batch_size) = batch_size {
        config.scan.batch_size = batch_size;
    }
    if seed.is_some() {
        config.spectrometer.seed = seed;
    }
    let export_format = output
        .as_deref()
        .map(|path| resolve_format(path, format))
        .transpose()?;

    let stage = MockStage::with_config(&config.stage);
    stage.connect().await.context("Stage connection failed")?;
    let spectrometer = MockSpectrometer::with_config(&config.spectrometer);
    spectrometer
        .connect()
        .await
        .context("Spectrometer connection failed")?;
    let inference = MockInference::with_config(&config.inference);

    let orchestrator = Arc::new(ScanOrchestrator::with_config(
        Arc::new(stage),
        Arc::new(spectrometer),
        Arc::new(inference),
        config.orchestrator.clone(),
    ));
    orchestrator.add_progress_observer(Arc::new(
        |snapshot: &StatusSnapshot| -> anyhow::Result<()> {
            log_progress(snapshot);
            Ok(())
        },
    ));

    let params = config.scan.clone();
    info!(
        name = %config.application.name,
        points = params.point_count(),
        batch_size = params.batch_size,
        "Starting scan"
    );

    let mut scan = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.start_scan(params).await })
    };

    let outcome = tokio::select! {
        joined = &mut scan => joined?,
        _ = signal::ctrl_c() => {
            warn!("Interrupt received, cancelling scan");
            orchestrator.cancel_scan();
            scan.await?
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            // Preparation failures still leave a result worth exporting.
            if let (Some(path), Some(format)) = (output.as_deref(), export_format) {
                if orchestrator.current_result().is_some() {
                    orchestrator.export_scan_data(path, format)?;
                }
            }
            return Err(e).context("Scan failed");
        }
    };

    print_summary(&result);

    if let (Some(path), Some(format)) = (output.as_deref(), export_format) {
        orchestrator.export_scan_data(path, format)?;
        println!("Exported {} to {}", format, path.display());
    }

    if result.status == ScanStatus::Error {
        bail!(
            "Scan {} ended with error: {}",
            result.scan_id,
            result.error_message.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

fn validate_scan(config: &AppConfig) -> Result<()> {
    let params: &ScanParameters = &config.scan;
    let limits = TravelLimits::from_origin(config.stage.x_max_mm, config.stage.y_max_mm);
    params
        .validate(&limits)
        .context("Scan parameters rejected")?;

    let grid = ScanGrid::new(params);
    println!("Configuration OK");
    println!(
        "  grid: {} x {} = {} points ({})",
        grid.nx(),
        grid.ny(),
        grid.total_points(),
        if params.serpentine { "serpentine" } else { "raster" }
    );
    println!(
        "  batch size: {}, integration time: {} s, model: {}",
        params.batch_size, params.integration_time, params.model_id
    );
    Ok(())
}

/// Explicit format wins; otherwise use the file extension.
fn resolve_format(path: &Path, format: Option<ExportFormat>) -> Result<ExportFormat> {
    if let Some(format) = format {
        return Ok(format);
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| anyhow!("Cannot infer export format from {}; pass --format", path.display()))?;
    Ok(extension.parse::<ExportFormat>()?)
}

fn log_progress(snapshot: &StatusSnapshot) {
    info!(
        status = %snapshot.status,
        completed = snapshot.completed_points,
        total = snapshot.total_points,
        progress = format_args!("{:.1}%", snapshot.progress * 100.0),
        eta_s = ?snapshot.estimated_remaining_seconds.map(|s| s.round()),
        "Scan progress"
    );
}

fn print_summary(result: &ScanResult) {
    println!();
    println!("Scan {} {}", result.scan_id, result.status);
    println!(
        "  points: {}/{} visited, {} failed",
        result.completed_points,
        result.total_points,
        result.failed_points()
    );
    match result.statistics() {
        Some(stats) => println!(
            "  purity: mean {:.2}, std {:.2}, min {:.2}, median {:.2}, max {:.2} ({} valid)",
            stats.mean, stats.std, stats.min, stats.median, stats.max, stats.valid_points
        ),
        None => println!("  purity: no valid points"),
    }
}
