//! Xeray CLI
//!
//! Administrative commands for a fleet of Xray proxy nodes:
//! - Node registration and lifecycle (add, restart, poll, disconnect, ...)
//! - Inbound/outbound record management
//! - Routing document preview and the audit log

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xeray::commands::{
    self, InboundPatch, InboundSpec, NodePatch, NodeSpec, OutboundPatch, OutboundSpec,
};
use xeray::context::Context;
use xr_core::{InboundId, OutboundId, ServerId};

#[derive(Parser)]
#[command(name = "xeray")]
#[command(author, version, about = "Fleet control for Xray proxy nodes")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage proxy nodes
    #[command(alias = "server")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Manage a node's inbound records
    Inbound {
        #[command(subcommand)]
        action: InboundAction,
    },

    /// Manage a node's outbound records
    Outbound {
        #[command(subcommand)]
        action: OutboundAction,
    },

    /// Print a node's routing document without writing it
    Render {
        /// Server ID
        id: i64,
    },

    /// Show the audit log
    Audit {
        /// Only entries for this server
        #[arg(short, long)]
        server: Option<i64>,
        /// Only the latest N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum NodeAction {
    /// List registered nodes
    #[command(alias = "ls")]
    List {
        /// Show config paths and session ids
        #[arg(short, long)]
        long: bool,
    },
    /// Register a node, write its routing document and connect its agent
    Add(NodeSpec),
    /// Change a node's details and reconnect it
    Update {
        id: i64,
        #[command(flatten)]
        patch: NodePatch,
    },
    /// Disconnect and remove a node with all its records
    #[command(alias = "rm")]
    Delete { id: i64 },
    /// Restart the proxy on a node
    Restart { id: i64 },
    /// Refresh a node's status from its agent (all nodes if no id)
    Poll { id: Option<i64> },
    /// End a node's agent session
    Disconnect { id: i64 },
    /// Run a named agent command, such as get_stats
    Exec {
        id: i64,
        command: String,
        /// Command parameters as a JSON object
        #[arg(short, long)]
        params: Option<String>,
    },
}

#[derive(Subcommand)]
enum InboundAction {
    /// List a server's inbounds
    #[command(alias = "ls")]
    List { server: i64 },
    /// Create an inbound
    Add(InboundSpec),
    /// Change an inbound
    Update {
        id: i64,
        #[command(flatten)]
        patch: InboundPatch,
    },
    /// Include an inbound in its server's routing document
    Enable { id: i64 },
    /// Leave an inbound out of its server's routing document
    Disable { id: i64 },
    /// Remove an inbound
    #[command(alias = "rm")]
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum OutboundAction {
    /// List a server's outbounds
    #[command(alias = "ls")]
    List { server: i64 },
    /// Create an outbound
    Add(OutboundSpec),
    /// Change an outbound
    Update {
        id: i64,
        #[command(flatten)]
        patch: OutboundPatch,
    },
    /// Include an outbound in its server's routing document
    Enable { id: i64 },
    /// Leave an outbound out of its server's routing document
    Disable { id: i64 },
    /// Remove an outbound
    #[command(alias = "rm")]
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Pre-shared agent secret
        #[arg(long)]
        secret: Option<String>,
        /// Fixed agent URL instead of per-node addressing
        #[arg(long)]
        endpoint: Option<String>,
        /// Entity store file
        #[arg(long)]
        store: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.as_deref();

    let command = match cli.command {
        Commands::Config { action } => return config_command(action, config_path),
        command => command,
    };
    let ctx = Context::load(config_path)?;

    match command {
        Commands::Node { action } => match action {
            NodeAction::List { long } => commands::node_list(&ctx, long).await,
            NodeAction::Add(spec) => commands::node_add(&ctx, spec).await,
            NodeAction::Update { id, patch } => {
                commands::node_update(&ctx, ServerId(id), patch).await
            }
            NodeAction::Delete { id } => commands::node_delete(&ctx, ServerId(id)).await,
            NodeAction::Restart { id } => commands::node_restart(&ctx, ServerId(id)).await,
            NodeAction::Poll { id } => commands::node_poll(&ctx, id.map(ServerId)).await,
            NodeAction::Disconnect { id } => commands::node_disconnect(&ctx, ServerId(id)).await,
            NodeAction::Exec {
                id,
                command,
                params,
            } => commands::node_exec(&ctx, ServerId(id), &command, params.as_deref()).await,
        },

        Commands::Inbound { action } => match action {
            InboundAction::List { server } => commands::inbound_list(&ctx, ServerId(server)).await,
            InboundAction::Add(spec) => commands::inbound_add(&ctx, spec).await,
            InboundAction::Update { id, patch } => {
                commands::inbound_update(&ctx, InboundId(id), patch).await
            }
            InboundAction::Enable { id } => {
                commands::inbound_set_enabled(&ctx, InboundId(id), true).await
            }
            InboundAction::Disable { id } => {
                commands::inbound_set_enabled(&ctx, InboundId(id), false).await
            }
            InboundAction::Delete { id } => commands::inbound_delete(&ctx, InboundId(id)).await,
        },

        Commands::Outbound { action } => match action {
            OutboundAction::List { server } => {
                commands::outbound_list(&ctx, ServerId(server)).await
            }
            OutboundAction::Add(spec) => commands::outbound_add(&ctx, spec).await,
            OutboundAction::Update { id, patch } => {
                commands::outbound_update(&ctx, OutboundId(id), patch).await
            }
            OutboundAction::Enable { id } => {
                commands::outbound_set_enabled(&ctx, OutboundId(id), true).await
            }
            OutboundAction::Disable { id } => {
                commands::outbound_set_enabled(&ctx, OutboundId(id), false).await
            }
            OutboundAction::Delete { id } => {
                commands::outbound_delete(&ctx, OutboundId(id)).await
            }
        },

        Commands::Render { id } => commands::render_command(&ctx, ServerId(id)).await,

        Commands::Audit { server, limit } => {
            commands::audit_command(&ctx, server.map(ServerId), limit).await
        }

        // Handled before the store is opened
        Commands::Config { action } => config_command(action, config_path),
    }
}

fn config_command(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => commands::config_show(config_path),
        ConfigAction::Init {
            secret,
            endpoint,
            store,
            force,
        } => commands::config_init(config_path, secret, endpoint, store, force),
        ConfigAction::Path => commands::config_path(config_path),
    }
}
