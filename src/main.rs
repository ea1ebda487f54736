//! Socksbridge - Anonymous-to-Authenticated SOCKS5 Bridge
//!
//! This is the main entry point for the Socksbridge application.

use anyhow::{Context, Result};
use clap::Parser;
use socksbridge::config::load_config;
use socksbridge::{AuthenticatingBridge, ProxyServer, ServerState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Socksbridge - local anonymous SOCKS5 server bridging to an authenticated proxy
#[derive(Parser, Debug)]
#[command(name = "socksbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = load_config(&args.config)?;
    config.validate().context("Invalid configuration")?;

    info!("Socksbridge v{}", socksbridge::VERSION);
    info!("Configuration loaded from: {:?}", args.config);
    info!(
        "Remote proxy: {} ({}, {})",
        config.proxy.addr(),
        if config.proxy.credentials().is_some() {
            "authenticated"
        } else {
            "anonymous"
        },
        if config.proxy.tls.is_some() { "tls" } else { "tcp" }
    );

    let bridge = Arc::new(AuthenticatingBridge::new(&config.proxy)?);
    let mut server = ProxyServer::new(config.server, bridge);
    server.start().await?;

    let mut state_rx = server.subscribe();
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = state_rx.wait_for(|state| *state == ServerState::Crashed) => {
            error!("Server crashed, shutting down...");
        }
    }

    server.stop().await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to setup SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Setup logging based on configuration
///
/// `RUST_LOG`, when set, takes precedence over `--log-level`.
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(level));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Filter used when `RUST_LOG` is not set
fn level_filter(level: Level) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
}
