//! Xeray Agent Daemon
//!
//! Runs on each proxy node and serves the control plane's signed commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xr_agent::{router, run_heartbeat_monitor, AgentState};
use xr_core::config::{self, AgentConfig, SECRET_ENV};

#[derive(Parser)]
#[command(name = "xr-agent")]
#[command(about = "Xeray node agent - accepts signed control commands")]
#[command(version)]
struct Args {
    /// Address to bind to (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Pre-shared secret (overrides config)
    #[arg(long, env = SECRET_ENV, hide_env_values = true)]
    secret: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Binding file (overrides config)
    #[arg(long)]
    state: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Xeray agent starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_dir().join("agent.toml"));

    let mut config: AgentConfig = if config_path.exists() {
        config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        tracing::info!("Using default configuration");
        AgentConfig::default()
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(secret) = args.secret {
        config.secret = secret;
    }
    if config.secret.is_empty() {
        anyhow::bail!(
            "No secret configured. Set `secret` in {:?}, pass --secret, or export {}",
            config_path,
            SECRET_ENV
        );
    }

    if let Some(state_path) = args.state {
        config.state_path = Some(state_path);
    }
    let state_path = config
        .state_path
        .get_or_insert_with(|| config::default_config_dir().join("agent-bindings.json"))
        .clone();

    let bind_addr = config.bind_address.clone();
    let state = Arc::new(
        AgentState::open(config)
            .with_context(|| format!("Failed to restore bindings from {:?}", state_path))?,
    );
    tracing::info!(
        "Loaded {} binding(s) from {}",
        state.binding_count(),
        state_path.display()
    );

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let monitor = tokio::spawn(run_heartbeat_monitor(state.clone(), cancel.clone()));

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Agent server failed")?;

    if let Err(e) = monitor.await {
        tracing::warn!("Heartbeat monitor ended abnormally: {}", e);
    }

    tracing::info!("Agent shutdown complete");
    Ok(())
}
