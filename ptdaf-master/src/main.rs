//! PT DAF Master - Main entry point
//!
//! Loads the configuration and population, starts a local cluster of
//! workers and runs the phase pipeline until the completion marker is
//! written.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ptdaf_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use ptdaf_common::{DafConfig, ModelContext};
use ptdaf_master::{run_local_cluster, Population};
use ptdaf_worker::ReferenceModel;

/// Command-line arguments for ptdaf-master
#[derive(Parser, Debug)]
#[command(name = "ptdaf-master")]
#[command(about = "Phase-barrier dispatcher for the PT travel model")]
#[command(version)]
struct Args {
    /// Config file (falls back to PTDAF_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of work queues
    #[arg(short, long)]
    work_queues: Option<usize>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PTDAF_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to locate configuration")?;
    let mut config = DafConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    if let Some(work_queues) = args.work_queues {
        config.queues.work_queues = work_queues;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting PT DAF master");
    info!("Configuration: {}", config_path.display());

    let context = ModelContext::init(&config);
    let population =
        Population::from_config(&config.population).context("Failed to load population")?;

    let report = run_local_cluster(&config, context, population, Arc::new(ReferenceModel))
        .await
        .context("Pipeline failed")?;

    info!("Pipeline complete: {}", report.summary);
    info!(
        "{} workers stopped, {} households written",
        report.workers.len(),
        report.results_written
    );
    info!("Done file: {}", config.output.done_file.display());
    Ok(())
}
