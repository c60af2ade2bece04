#![forbid(unsafe_code)]

//! `replmux` — nREPL session orchestrator daemon.
//!
//! Loads configuration, optionally auto-connects to the project's nREPL
//! server, and serves `replmux-ctl` commands over local IPC until shut down.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use replmux::ipc::server::{spawn_ipc_server, IpcState};
use replmux::orchestrator::{ConnectOutcome, DisconnectOptions, Orchestrator};
use replmux::output::{OutputChannel, OutputLog};
use replmux::prompt::{ConfiguredBuildTargets, NoPrompt};
use replmux::transport::TcpConnector;
use replmux::{AppError, ReplConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "replmux", about = "nREPL session orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured project root.
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Connect to the published nREPL port on startup.
    #[arg(long)]
    auto_connect: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("replmux bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = ReplConfig::load_from_path(&args.config)?;

    if let Some(root) = args.project_root {
        config.project_root = root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid project root override: {err}")))?;
    }

    let config = Arc::new(config);
    info!(project_root = %config.project_root().display(), "configuration loaded");

    // ── Build the orchestrator ──────────────────────────
    let output = Arc::new(OutputLog::new(config.output_history));
    let orchestrator = Orchestrator::new(
        Arc::clone(&config),
        Arc::new(TcpConnector::from_config(&config)),
        Arc::new(ConfiguredBuildTargets::from_config(&config)),
        Arc::clone(&output) as Arc<dyn OutputChannel>,
    );

    if args.auto_connect {
        match orchestrator.auto_connect(&NoPrompt).await {
            Ok(ConnectOutcome::Connected(snapshot)) => {
                info!(hostname = %snapshot.hostname, port = ?snapshot.port, "auto-connected");
            }
            Ok(ConnectOutcome::Cancelled) => warn!("auto-connect found no port file"),
            Err(err) => warn!(%err, "auto-connect failed"),
        }
    }

    // ── Start IPC server ────────────────────────────────
    let ct = CancellationToken::new();
    let state = Arc::new(IpcState {
        orchestrator: orchestrator.clone(),
        output,
    });
    let ipc_handle = spawn_ipc_server(state, ct.clone())?;

    info!("replmux ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let report = orchestrator
        .disconnect(DisconnectOptions {
            end_transport: true,
        })
        .await;
    info!(
        closed = report.closed.len(),
        already_gone = report.already_gone.len(),
        "sessions torn down"
    );

    if let Err(err) = ipc_handle.await {
        error!(%err, "ipc server task failed");
    }
    info!("replmux shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
