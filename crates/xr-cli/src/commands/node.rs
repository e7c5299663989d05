//! Node command implementations

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::output::{
    format_servers, print_error, print_info, print_outcome, print_success, print_warning,
};
use xr_control::retry;
use xr_core::traits::EntityStore;
use xr_core::{ServerDetails, ServerId};

/// Fields describing a new node
#[derive(Debug, Args)]
pub struct NodeSpec {
    /// Display name
    pub name: String,
    /// Node IP address (also used to reach its agent)
    #[arg(long)]
    pub ip: String,
    /// Port the proxy listens on
    #[arg(long, default_value_t = 443)]
    pub port: u16,
    /// Transport protocol
    #[arg(long, default_value = "vless")]
    pub protocol: String,
    /// Free-form location label
    #[arg(long, default_value = "")]
    pub location: String,
    /// Where the node's routing configuration is written
    #[arg(long)]
    pub config_path: PathBuf,
}

impl From<NodeSpec> for ServerDetails {
    fn from(spec: NodeSpec) -> Self {
        ServerDetails {
            name: spec.name,
            location: spec.location,
            ip_address: spec.ip,
            port: spec.port,
            protocol: spec.protocol,
            config_path: spec.config_path,
        }
    }
}

/// Fields to change on an existing node; unset fields keep their value
#[derive(Debug, Args)]
pub struct NodePatch {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub ip: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub protocol: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub config_path: Option<PathBuf>,
}

impl NodePatch {
    fn apply(self, mut details: ServerDetails) -> ServerDetails {
        if let Some(name) = self.name {
            details.name = name;
        }
        if let Some(ip) = self.ip {
            details.ip_address = ip;
        }
        if let Some(port) = self.port {
            details.port = port;
        }
        if let Some(protocol) = self.protocol {
            details.protocol = protocol;
        }
        if let Some(location) = self.location {
            details.location = location;
        }
        if let Some(path) = self.config_path {
            details.config_path = path;
        }
        details
    }
}

/// List registered nodes
pub async fn node_list(ctx: &Context, long: bool) -> Result<()> {
    let servers = ctx.store().list_servers().await?;
    println!("{}", format_servers(&servers, long));
    Ok(())
}

/// Register a node, write its routing document and connect it
pub async fn node_add(ctx: &Context, spec: NodeSpec) -> Result<()> {
    let fleet = ctx.reconciler()?;
    let result = fleet.add_node(spec.into(), ctx.actor()).await;
    ctx.save().await?;

    match result {
        Ok(outcome) => {
            print_outcome("Added", &outcome);
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to add server: {}", e));
            Err(e.into())
        }
    }
}

/// Change a node's details, rewrite its routing document and reconnect
pub async fn node_update(ctx: &Context, id: ServerId, patch: NodePatch) -> Result<()> {
    let fleet = ctx.reconciler()?;
    let current = ctx.store().get_server(id).await?;
    let result = fleet
        .update_node(id, patch.apply(current.details()), ctx.actor())
        .await;
    ctx.save().await?;

    match result {
        Ok(outcome) => {
            print_outcome("Updated", &outcome);
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to update server {}: {}", id, e));
            Err(e.into())
        }
    }
}

/// Disconnect a node's agent and remove the node with its records
pub async fn node_delete(ctx: &Context, id: ServerId) -> Result<()> {
    let fleet = ctx.reconciler()?;
    let result = fleet.delete_node(id, ctx.actor()).await;
    ctx.save().await?;

    match result {
        Ok(outcome) => {
            if let Some(e) = &outcome.failure {
                print_warning(&format!("Agent did not confirm disconnect: {}", e));
            }
            print_success(&format!("Deleted server {} ({})", id, outcome.server.name));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to delete server {}: {}", id, e));
            Err(e.into())
        }
    }
}

/// Restart the proxy on a node, retrying while the agent is unreachable
pub async fn node_restart(ctx: &Context, id: ServerId) -> Result<()> {
    let fleet = ctx.reconciler()?;
    let actor = ctx.actor();
    let fleet = &fleet;
    let result = retry(&ctx.config.backoff, move || async move {
        fleet.restart_node(id, actor).await?.into_result()
    })
    .await;
    ctx.save().await?;

    match result {
        Ok(server) => {
            print_success(&format!("Restarted proxy on server {} ({})", id, server.name));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to restart server {}: {}", id, e));
            Err(e.into())
        }
    }
}

/// Poll one node, or every node that is not disconnected
pub async fn node_poll(ctx: &Context, id: Option<ServerId>) -> Result<()> {
    let fleet = ctx.reconciler()?;
    let actor = ctx.actor();

    let Some(id) = id else {
        let results = fleet.poll_all(actor).await;
        ctx.save().await?;
        let results = results?;
        if results.is_empty() {
            print_info("No servers to poll");
        }
        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(outcome) => print_outcome("Polled", &outcome),
                Err(e) => {
                    failed += 1;
                    print_error(&format!("Failed to poll server {}: {}", id, e));
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} server(s) could not be polled", failed);
        }
        return Ok(());
    };

    let fleet = &fleet;
    let result = retry(&ctx.config.backoff, move || async move {
        fleet.poll_status(id, actor).await?.into_result()
    })
    .await;
    ctx.save().await?;

    match result {
        Ok(server) => {
            print_success(&format!(
                "Server {} ({}) is {}",
                id,
                server.name,
                server.status()
            ));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to poll server {}: {}", id, e));
            Err(e.into())
        }
    }
}

/// End a node's daemon session
pub async fn node_disconnect(ctx: &Context, id: ServerId) -> Result<()> {
    let fleet = ctx.reconciler()?;
    let actor = ctx.actor();
    let fleet = &fleet;
    let result = retry(&ctx.config.backoff, move || async move {
        fleet.disconnect_node(id, actor).await?.into_result()
    })
    .await;
    ctx.save().await?;

    match result {
        Ok(server) => {
            print_success(&format!("Disconnected server {} ({})", id, server.name));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to disconnect server {}: {}", id, e));
            Err(e.into())
        }
    }
}

/// Run a named agent command on a node and print the agent's reply
pub async fn node_exec(
    ctx: &Context,
    id: ServerId,
    command: &str,
    params: Option<&str>,
) -> Result<()> {
    let params: Map<String, Value> = match params {
        Some(text) => serde_json::from_str(text)
            .with_context(|| format!("--params must be a JSON object, got {:?}", text))?,
        None => Map::new(),
    };

    let fleet = ctx.reconciler()?;
    let actor = ctx.actor();
    let fleet = &fleet;
    let result = retry(&ctx.config.backoff, move || {
        let params = params.clone();
        async move { fleet.run_command(id, command, params, actor).await }
    })
    .await;
    ctx.save().await?;

    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Command {} failed on server {}: {}", command, id, e));
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_keeps_unset_fields() {
        let details = ServerDetails {
            name: "edge".to_string(),
            location: "Paris".to_string(),
            ip_address: "10.0.0.1".to_string(),
            port: 443,
            protocol: "vless".to_string(),
            config_path: PathBuf::from("/etc/xray/edge.json"),
        };
        let patch = NodePatch {
            name: None,
            ip: Some("10.0.0.2".to_string()),
            port: None,
            protocol: None,
            location: None,
            config_path: Some(PathBuf::from("/srv/xray/edge.json")),
        };

        let updated = patch.apply(details.clone());
        assert_eq!(updated.ip_address, "10.0.0.2");
        assert_eq!(updated.config_path, PathBuf::from("/srv/xray/edge.json"));
        assert_eq!(updated.name, details.name);
        assert_eq!(updated.port, details.port);
    }
}
