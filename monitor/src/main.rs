//! Filedrop Monitor - debounced directory-to-SFTP transfer daemon.
//!
//! This binary watches an outbox directory, batches written files over a
//! quiet period, uploads them to an SFTP server and archives them locally.
//!
//! # Commands
//!
//! - `filedrop run`: Start the monitor daemon
//! - `filedrop check`: Validate configuration and test the SFTP login
//!
//! # Environment Variables
//!
//! See the [`filedrop_monitor::config`] module for available configuration options.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use filedrop_monitor::check::preflight;
use filedrop_monitor::config::Config;
use filedrop_monitor::filter::NameFilter;
use filedrop_monitor::pipeline::{Pipeline, PipelineConfig};
use filedrop_monitor::transfer::SftpConnector;
use filedrop_monitor::{
    MonitorSupervisor, NotifySource, RecoveryPolicy, Scheduler, SchedulerConfig,
};

/// Time allowed for reading the scheduler's pending list on shutdown.
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Filedrop Monitor - debounced directory-to-SFTP transfer daemon.
///
/// Watches a directory for written files and, once writes have been quiet
/// for a moment, uploads them to an SFTP server and moves them into an
/// archive directory.
#[derive(Parser, Debug)]
#[command(name = "filedrop")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    FILEDROP_WATCH_DIR          Directory to watch (required)
    FILEDROP_KEEP_DIR           Archive directory (required)
    FILEDROP_FILTER             File name glob (default: *)
    FILEDROP_SFTP_HOST          SFTP host (required)
    FILEDROP_SFTP_PORT          SFTP port (default: 22)
    FILEDROP_SFTP_USERNAME      SFTP username (required)
    FILEDROP_SFTP_PASSWORD      SFTP password (required)
    FILEDROP_SFTP_WORKING_PATH  Remote upload directory (default: login directory)
    FILEDROP_SFTP_TIMEOUT_SECS  Session timeout (default: 30)
    FILEDROP_QUIESCENCE_MS      Quiet period before a batch is sent (default: 2000)
    FILEDROP_RETRY_LIMIT        Attempts per file, 1-10 (default: 3)
    FILEDROP_LOG_FORMAT         'json' for JSON log lines
    RUST_LOG                    Log filter (default: info)

EXAMPLES:
    # Check configuration and SFTP login
    filedrop check

    # Start the monitor
    export FILEDROP_WATCH_DIR=/data/outbox FILEDROP_KEEP_DIR=/data/keep
    filedrop run
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the monitor daemon.
    ///
    /// Runs until SIGINT or SIGTERM. Files still queued at shutdown are left
    /// in the watch directory.
    Run,

    /// Validate configuration and test the SFTP login, then exit.
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command {
        Command::Run => runtime.block_on(run_monitor()),
        Command::Check => runtime.block_on(run_check()),
    }
}

/// Runs the monitor daemon.
async fn run_monitor() -> Result<()> {
    info!("Starting Filedrop Monitor");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        watch_dir = %config.watch_dir.display(),
        keep_dir = %config.keep_dir.display(),
        filter = %config.filter,
        remote = %config.sftp.address(),
        working_path = %config.sftp.working_path,
        quiescence_ms = config.quiescence.as_millis(),
        retry_limit = config.retry_limit,
        "Configuration loaded"
    );

    let filter = NameFilter::new(&config.filter).context("Invalid FILEDROP_FILTER")?;

    if !config.keep_dir.exists() {
        info!(
            keep_dir = %config.keep_dir.display(),
            "Creating archive directory"
        );
        std::fs::create_dir_all(&config.keep_dir).context("Failed to create archive directory")?;
    }

    let pipeline = Pipeline::new(PipelineConfig {
        keep_dir: config.keep_dir.clone(),
        remote_working_path: config.sftp.working_path.clone(),
        retry_limit: config.retry_limit,
    });
    let connector = SftpConnector::new(config.sftp.clone());

    let (scheduler, scheduler_task) =
        Scheduler::new(SchedulerConfig::new(config.quiescence), connector, pipeline).spawn();

    let supervisor = MonitorSupervisor::new(
        config.watch_dir.clone(),
        filter,
        NotifySource,
        scheduler.clone(),
        RecoveryPolicy::default(),
    );
    let supervisor_task = tokio::spawn(supervisor.run());

    info!("Monitor running. Press Ctrl+C to stop.");

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    supervisor_task.abort();

    match tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        scheduler.snapshot(),
    )
    .await
    {
        Ok(Ok(snapshot)) if !snapshot.pending.is_empty() => {
            warn!(
                pending = snapshot.pending.len(),
                "Abandoning queued files; they remain in the watch directory"
            );
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(error = %e, "Could not read scheduler state"),
        Err(_) => warn!("Transfer in progress at shutdown, abandoning it"),
    }

    scheduler_task.abort();

    info!("Monitor stopped");
    Ok(())
}

/// Runs the preflight check.
async fn run_check() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let connector = SftpConnector::new(config.sftp.clone());

    let report = tokio::task::spawn_blocking(move || preflight(&config, &connector))
        .await
        .context("Preflight task failed")?
        .context("Preflight check failed")?;

    println!("Filter:        {}", report.filter);
    println!("Watch dir:     {}", report.watch_dir.display());
    println!("Archive dir:   {}", report.keep_dir.display());
    println!("SFTP endpoint: {} (login ok)", report.remote);

    Ok(())
}

/// Initializes the logging subsystem.
///
/// `FILEDROP_LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FILEDROP_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
