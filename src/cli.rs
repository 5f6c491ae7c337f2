//! Command-line interface for callkeeper.
//!
//! `run` is the long-lived mode: startup scan, file watcher, capture
//! supervisor with watchdog, then wait for ctrl-c. `scan` and
//! `check-config` are one-shot helpers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::config::Config;
use crate::hook::{DownstreamHook, NullHook, WebhookNotifier};
use crate::ingest::{watcher, FileIngestionPipeline};
use crate::supervisor::{LaunchSpec, ProcessSupervisor, SupervisorOptions, WatchdogPolicy};

/// callkeeper - DMR capture supervisor and recording organizer
#[derive(Parser, Debug)]
#[command(name = "callkeeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml", env = "CALLKEEPER_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Supervise the capture process and ingest recordings until interrupted
    Run,

    /// Organize files already in the staging directory, then exit
    Scan,

    /// Load and validate the configuration, printing resolved values
    CheckConfig,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;

        match self.command {
            Commands::Run => run(config).await,
            Commands::Scan => scan(config).await,
            Commands::CheckConfig => check_config(config),
        }
    }
}

fn build_hook(config: &Config) -> Result<Arc<dyn DownstreamHook>> {
    match WebhookNotifier::from_config(config)? {
        Some(notifier) => Ok(Arc::new(notifier)),
        None => Ok(Arc::new(NullHook)),
    }
}

async fn run(config: Config) -> Result<()> {
    let hook = build_hook(&config)?;
    let pipeline = Arc::new(FileIngestionPipeline::from_config(&config.ingest, hook));

    // Recover recordings that arrived while we were down, then go live
    pipeline.scan_existing().await?;
    let watch = watcher::spawn(Arc::clone(&pipeline))?;

    let supervisor = ProcessSupervisor::new(
        LaunchSpec::from_config(&config.radio, &config.ingest),
        WatchdogPolicy::from_config(&config.watchdog),
        SupervisorOptions::default(),
    );

    // A capture launch failure is not fatal to ingestion; keep serving
    // the staging directory and let the operator fix the decoder
    if let Err(e) = supervisor.start().await {
        error!("failed to start capture process: {e}");
        error!("continuing without capture; check your configuration and decoder installation");
    } else {
        let status = supervisor.status().await;
        info!(
            pid = status.pid,
            "capture running on {} MHz (gain {})", status.frequency, status.gain
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    supervisor.stop(true).await?;
    watch.stop().await;

    Ok(())
}

async fn scan(config: Config) -> Result<()> {
    let hook = build_hook(&config)?;
    let pipeline = FileIngestionPipeline::from_config(&config.ingest, hook);

    let summary = pipeline.scan_existing().await?;
    println!(
        "Organized {} recordings ({} skipped, {} errors)",
        summary.ingested, summary.skipped, summary.errors
    );

    Ok(())
}

fn check_config(config: Config) -> Result<()> {
    let spec = LaunchSpec::from_config(&config.radio, &config.ingest);

    println!("Configuration OK");
    println!("  capture command:  {}", spec.render());
    println!(
        "  watchdog:         restart every {}s, freeze check every {}s, frozen after {}s",
        config.watchdog.restart_interval_secs,
        config.watchdog.frozen_check_interval_secs,
        config.watchdog.frozen_timeout_secs
    );
    println!(
        "  ingest:           {} -> {} (dedup window {}s{})",
        config.ingest.staging_dir.display(),
        config.ingest.store_dir.display(),
        config.ingest.dedup_window_secs,
        if config.ingest.recursive {
            ", recursive"
        } else {
            ""
        }
    );
    println!(
        "  notifications:    {}",
        if config.notifications.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  units configured: {}", config.units.len());

    Ok(())
}
