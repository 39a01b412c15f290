#![forbid(unsafe_code)]

//! `ctrlpoint-tap`: named-pipe log tap binary.
//!
//! Creates the log endpoint, optionally launches the monitored executable,
//! and writes every control-point record to stdout as one JSON line.
//! Diagnostics go to stderr.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ctrlpoint_tap::config::GlobalConfig;
use ctrlpoint_tap::output::write_records;
use ctrlpoint_tap::reader::sink::ChannelSink;
use ctrlpoint_tap::session::TapSession;
use ctrlpoint_tap::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ctrlpoint-tap", about = "Control-point log tap", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Executable to monitor (overrides the config file).
    #[arg(short, long)]
    exe: Option<PathBuf>,

    /// Launch the executable at startup.
    #[arg(short, long)]
    auto_launch: bool,

    /// Base name of the pipe endpoint (overrides the config file).
    #[arg(long)]
    pipe_name: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("ctrlpoint-tap bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(exe) = args.exe {
        config.executable = Some(exe);
    }
    if args.auto_launch {
        config.auto_launch = true;
    }
    if let Some(name) = args.pipe_name {
        config.pipe_name = name;
    }
    config.validate()?;
    info!("configuration loaded");

    // ── Start the tap ───────────────────────────────────
    let (sink, records) = ChannelSink::channel();
    let output = tokio::spawn(write_records(tokio::io::stdout(), records));
    let session = TapSession::start(&config, sink, CancellationToken::new())?;
    info!(pipe = %session.endpoint_name(), "listening for control points");

    let mut state = session.subscribe();

    // ── Wait for shutdown signal or reader failure ──────
    tokio::select! {
        signal = shutdown_signal() => info!(signal, "shutting down"),
        res = state.wait_for(|s| s.is_terminal()) => {
            if res.is_err() {
                warn!("log reader state channel closed");
            }
        }
    }

    // The reader drops its sink on exit, which ends the output task.
    let stopped = session.shutdown().await;
    match output.await {
        Ok(Ok(written)) => debug!(written, "record output drained"),
        Ok(Err(err)) => warn!(%err, "record output stopped early"),
        Err(err) => warn!(%err, "record output task failed"),
    }

    let summary = stopped.map_err(|err| {
        error!(%err, "log reader failed");
        err
    })?;

    info!(
        lines = summary.lines_read,
        records = summary.records_emitted,
        discarded = summary.lines_discarded,
        read_errors = summary.read_errors,
        reconnects = summary.reconnects,
        "ctrlpoint-tap shut down"
    );

    Ok(())
}

/// Resolve on Ctrl-C or, on Unix, `SIGTERM`. Yields the signal name.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(err) => {
                warn!(%err, "SIGTERM handler unavailable, waiting for ctrl-c only");
                wait_ctrl_c().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_ctrl_c().await
    }
}

async fn wait_ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        // Without a handler the tap runs until the reader stops on its own.
        error!(%err, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
    "ctrl-c"
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let installed = match log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| AppError::Config(format!("tracing subscriber: {err}")))
}
