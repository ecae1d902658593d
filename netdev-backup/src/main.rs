//! netdev-backup - Main entry point
//!
//! Backs up every configured network device once and exits.

use anyhow::Result;
use clap::Parser;
use netdev_backup::{config::Config, daemon::ShutdownCoordinator, store, utils, Orchestrator};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: ./config.yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = Config::load(args.config.as_deref(), args.log_level.as_deref())?;

    // Initialize logging
    utils::logger::init(&config.log.level)?;

    tracing::info!("Starting netdev-backup v{}", env!("CARGO_PKG_VERSION"));

    let destination = store::Destination::parse(&config.destination)?;
    tracing::info!("storing artifacts in {}", destination);
    let store = store::open(&destination, &config.s3).await?;

    let targets = config.targets();
    tracing::info!(
        "found {} devices to backup (out of: {})",
        targets.len(),
        config.devices.len()
    );

    let shutdown = ShutdownCoordinator::new();
    let orchestrator = Orchestrator::with_cancel(store, config.http_timeout, shutdown.token());

    let run = orchestrator.run_all(targets);
    tokio::pin!(run);

    let report = tokio::select! {
        report = &mut run => report,
        _ = shutdown.wait_for_signal() => {
            // Pipelines see the cancelled token and finish as Cancelled
            run.await
        }
    };

    if !report.is_success() {
        anyhow::bail!(
            "{} of {} devices failed (run {})",
            report.failed(),
            report.devices.len(),
            report.run_id
        );
    }

    Ok(())
}
