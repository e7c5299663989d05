//! Inbound record command implementations

use anyhow::Result;
use clap::Args;

use super::read_settings;
use crate::context::Context;
use crate::output::{format_inbounds, print_error, print_success};
use xr_core::traits::EntityStore;
use xr_core::{Inbound, InboundDetails, InboundId, ServerId, XrError};

/// Fields describing a new inbound
#[derive(Debug, Args)]
pub struct InboundSpec {
    /// Server the inbound belongs to
    #[arg(long)]
    pub server: i64,
    /// Display name
    pub name: String,
    /// Listening port, unique among the server's enabled inbounds
    #[arg(long)]
    pub port: u16,
    #[arg(long, default_value = "vless")]
    pub protocol: String,
    /// Settings as a JSON object
    #[arg(long, conflicts_with = "settings_file")]
    pub settings: Option<String>,
    /// Read settings from a file
    #[arg(long)]
    pub settings_file: Option<std::path::PathBuf>,
    /// Create the inbound disabled
    #[arg(long)]
    pub disabled: bool,
}

/// Fields to change on an inbound; unset fields keep their value
#[derive(Debug, Args)]
pub struct InboundPatch {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub protocol: Option<String>,
    #[arg(long, conflicts_with = "settings_file")]
    pub settings: Option<String>,
    #[arg(long)]
    pub settings_file: Option<std::path::PathBuf>,
}

/// List a server's inbounds
pub async fn inbound_list(ctx: &Context, server: ServerId) -> Result<()> {
    let inbounds = ctx.store().list_inbounds(server).await?;
    println!("{}", format_inbounds(&inbounds));
    Ok(())
}

/// Create an inbound and rewrite its server's routing document
pub async fn inbound_add(ctx: &Context, spec: InboundSpec) -> Result<()> {
    let settings =
        read_settings(spec.settings, spec.settings_file.as_deref())?.unwrap_or_default();
    let server = ServerId(spec.server);
    let details = InboundDetails {
        name: spec.name,
        protocol: spec.protocol,
        port: spec.port,
        settings,
        enabled: !spec.disabled,
    };

    let fleet = ctx.editor()?;
    let result = fleet.add_inbound(server, details, ctx.actor()).await;
    ctx.save().await?;

    match result {
        Ok(inbound) => {
            print_success(&format!(
                "Added inbound {} ({}) on port {} to server {}",
                inbound.id, inbound.name, inbound.port, server
            ));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to add inbound: {}", e));
            Err(e.into())
        }
    }
}

/// Change an inbound and rewrite its server's routing document
pub async fn inbound_update(ctx: &Context, id: InboundId, patch: InboundPatch) -> Result<()> {
    let mut details = ctx.store().get_inbound(id).await?.details();
    if let Some(name) = patch.name {
        details.name = name;
    }
    if let Some(port) = patch.port {
        details.port = port;
    }
    if let Some(protocol) = patch.protocol {
        details.protocol = protocol;
    }
    if let Some(settings) = read_settings(patch.settings, patch.settings_file.as_deref())? {
        details.settings = settings;
    }

    let fleet = ctx.editor()?;
    let result = fleet.update_inbound(id, details, ctx.actor()).await;
    ctx.save().await?;
    report(result, "Updated", id)
}

/// Enable or disable an inbound
pub async fn inbound_set_enabled(ctx: &Context, id: InboundId, enabled: bool) -> Result<()> {
    let fleet = ctx.editor()?;
    let result = fleet.set_inbound_enabled(id, enabled, ctx.actor()).await;
    ctx.save().await?;
    report(result, if enabled { "Enabled" } else { "Disabled" }, id)
}

/// Remove an inbound and rewrite its server's routing document
pub async fn inbound_delete(ctx: &Context, id: InboundId) -> Result<()> {
    let fleet = ctx.editor()?;
    let result = fleet.delete_inbound(id, ctx.actor()).await;
    ctx.save().await?;
    report(result, "Deleted", id)
}

fn report(result: Result<Inbound, XrError>, verb: &str, id: InboundId) -> Result<()> {
    match result {
        Ok(inbound) => {
            print_success(&format!("{} inbound {} ({})", verb, id, inbound.name));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed on inbound {}: {}", id, e));
            Err(e.into())
        }
    }
}
