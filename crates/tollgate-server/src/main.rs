//! tollgate: license-gated TCP relay.
//!
//! Accepts connections on a public port, checks the license expiry once per
//! connection, and relays permitted connections byte-for-byte to a fixed
//! backend.

mod config;
mod license;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use config::{ConfigOverrides, GateConfig};
use license::License;
use std::path::PathBuf;
use std::sync::Arc;
use tollgate_core::{Acceptor, AdmissionGate, SessionLimiter, TcpConnector};
use tracing::{error, info, warn};

/// tollgate: license-gated TCP relay
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "License-gated Layer-4 relay")]
struct Cli {
    /// Listen address (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Backend address (host:port)
    #[arg(short, long)]
    backend: Option<String>,

    /// License expiry, RFC 3339 (e.g. 2026-12-31T23:59:59Z)
    #[arg(long)]
    expires_at: Option<String>,

    /// License file (TOML with `expires_at`)
    #[arg(long)]
    license_file: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.tollgate/config.toml")]
    config: String,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Idle timeout in seconds (0 = none)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Backend connect timeout in seconds (0 = OS default)
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting tollgate");

    tokio::select! {
        result = run(cli) => {
            if let Err(e) = result {
                error!(error = %format!("{e:#}"), "fatal");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("tollgate stopped");
}

/// Load config and license, bind, then accept until the process is stopped.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = PathBuf::from(&cli.config);
    let overrides = ConfigOverrides {
        listen: cli.listen,
        backend: cli.backend,
        expires_at: cli.expires_at,
        license_file: cli.license_file,
        max_sessions: cli.max_sessions,
        idle_timeout: cli.idle_timeout,
        connect_timeout: cli.connect_timeout,
    };
    let config = GateConfig::load(Some(&config_path), overrides)
        .context("failed to load config")?;

    let license = License::resolve(&config.license).context("failed to load license")?;
    license.log_status(Utc::now());

    let connector = TcpConnector::new(config.backend_addr.clone())
        .with_timeout(config.connect_timeout);
    let gate = AdmissionGate::new(Arc::new(license.oracle()), connector)
        .with_limiter(SessionLimiter::new(config.max_sessions))
        .with_reject_message(config.reject_message.clone())
        .with_idle_timeout(config.idle_timeout);

    let acceptor = Acceptor::bind(&config.listen)
        .await
        .context("cannot start relay listener")?;

    info!(
        listen = %acceptor.local_addr(),
        backend = %config.backend_addr,
        max_sessions = ?config.max_sessions,
        idle_timeout = ?config.idle_timeout,
        "relay ready"
    );

    acceptor.run(Arc::new(gate)).await;
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
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
