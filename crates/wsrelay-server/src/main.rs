//! wsrelay-server: real-time channel relay over WebSocket.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use wsrelay_server::config::{CliOverrides, ServerConfig};
use wsrelay_server::{console, ChannelRouter, ModeChange, RelayServer};

/// wsrelay-server — channel relay
#[derive(Parser, Debug)]
#[command(name = "wsrelay-server", version, about = "Real-time channel relay over WebSocket")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Shared key every publisher must present
    #[arg(long, env = "WSRELAY_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Route every message to a single channel
    #[arg(long, conflicts_with = "channels")]
    single: bool,

    /// Number of channels in multi-channel mode
    #[arg(long)]
    channels: Option<usize>,

    /// Config file path
    #[arg(long, default_value = "~/.wsrelay/config.toml")]
    config: String,

    /// Read operator commands from stdin
    #[arg(long)]
    console: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting wsrelay-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        bind: cli.bind,
        port: cli.port,
        key: cli.key.clone(),
        single: cli.single,
        channels: cli.channels,
    };
    let config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let router = Arc::new(ChannelRouter::new());
    match router.configure_mode(config.mode).await {
        Ok(ModeChange::Applied(_)) => {}
        Ok(ModeChange::Locked { current }) => {
            warn!(mode = %current, "router mode already locked");
        }
        Err(e) => {
            error!(error = %e, "invalid channel mode");
            std::process::exit(1);
        }
    }

    let server = RelayServer::new(router.clone());
    if let Err(e) = server.listen(config.bind, config.port, &config.key).await {
        error!(error = %e, "failed to start relay");
        std::process::exit(1);
    }

    if cli.console {
        tokio::spawn(console::run_stdin(router.clone()));
    }

    shutdown_signal().await;
    info!("received shutdown signal");
    server.shutdown();

    // Give session tasks a moment to send their close frames.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("wsrelay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
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
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
