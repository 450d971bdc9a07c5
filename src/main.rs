// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! sensor — passive network sensor CLI.
//!
//! Usage:
//!   sensor [-c configFile] [-p pidFile]
//!
//! The donor forks, daemonizes, and signals the parent with `SIGUSR1` once
//! the child has finished initializing (§6 "CLI"). That dance is explicitly
//! out of scope per §1; this binary runs in the foreground under whatever
//! process supervisor the operator chooses, and shuts down on `SIGTERM` (or
//! Ctrl-C, for interactive use) exactly as the donor's own `Record`
//! subcommand relies on `tokio::signal::ctrl_c()`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use netsensor::analyzer::AnalyzerHost;
use netsensor::capture::LiveCapture;
use netsensor::config::Config;

#[derive(Parser)]
#[command(name = "sensor", about = "Passive network sensor", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "sensor.toml")]
    config: PathBuf,

    /// Optional PID file, written on startup and removed on clean shutdown.
    #[arg(short = 'p', long = "pid-file")]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "sensor exited with an error");
        std::process::exit(1);
    }
}

/// The library crate's own operations return `Result<T, SensorError>`
/// (§7's total-function-plus-error-accessor idiom, read through `?`
/// propagation); `anyhow` wraps that here at the process boundary so
/// `main` can report any of them uniformly, matching the donor's own
/// split between typed library errors and an opaque top-level error at
/// its CLI entry point.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_file(&cli.config)?;
    info!(
        interface = %config.interface,
        analyzers = config.analyzers.len(),
        flush_interval_secs = config.flush_interval_secs,
        "Starting sensor"
    );

    let pid_path = match &cli.pid_file {
        Some(path) if path.is_relative() => Some(std::env::current_dir()?.join(path)),
        other => other.clone(),
    };
    if let Some(path) = &pid_path {
        std::fs::write(path, std::process::id().to_string())?;
    }

    let host = Arc::new(AnalyzerHost::build(&config)?);
    let mut capture = LiveCapture::open(&config.interface)?;
    capture.set_filter(host.filter_expression())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining");
        signal_shutdown.store(true, Ordering::SeqCst);
    });

    let result = host.run(Box::new(capture), shutdown).await;

    if let Some(path) = &pid_path {
        let _ = std::fs::remove_file(path);
    }

    result.map_err(Into::into)
}

/// Waits for `SIGTERM` (§5's cancellation signal) or, for interactive runs
/// without a supervisor, Ctrl-C.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler; falling back to Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
