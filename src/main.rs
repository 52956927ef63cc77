#![forbid(unsafe_code)]

//! `chat-bridge`: multi-account messaging bridge speaking JSON-RPC on stdio.
//!
//! Bootstraps configuration, opens the overflow store, and serves requests
//! from stdin until end of input or a termination signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use chat_bridge::app::Bridge;
use chat_bridge::config::GlobalConfig;
use chat_bridge::driver::memory::{MemoryConnector, MemoryNetwork};
use chat_bridge::persistence::db;
use chat_bridge::rpc::output::OutputChannel;
use chat_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "chat-bridge", about = "Messaging bridge control plane", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the directory holding the overflow store.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("chat-bridge bootstrap");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    config.load_credentials().await?;
    info!(
        api_id = config.api_id,
        backend = config.backend_url().unwrap_or("none"),
        "configuration loaded"
    );

    // ── Open the overflow store ─────────────────────────
    let db = db::connect(&config.overflow_db_path()).await?;
    info!(path = %config.overflow_db_path().display(), "overflow store opened");

    // ── Assemble ────────────────────────────────────────
    let output = Arc::new(OutputChannel::stdout(config.rpc.output_capacity)?);
    let connector = Arc::new(MemoryConnector::new(MemoryNetwork::demo()));
    let bridge = Bridge::start(&config, connector, output, db).await?;

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    // ── Serve until EOF or signal ───────────────────────
    let served = bridge.run(tokio::io::stdin(), ct).await;
    signal_handle.abort();
    match served {
        Ok(summary) => {
            info!(
                accepted = summary.accepted,
                rejected = summary.rejected,
                "chat-bridge shut down"
            );
            Ok(())
        }
        Err(err) => {
            error!(%err, "input stream failed");
            Err(err)
        }
    }
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
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the RPC stream.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

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
