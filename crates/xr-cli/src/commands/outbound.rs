//! Outbound record command implementations

use anyhow::Result;
use clap::Args;

use super::read_settings;
use crate::context::Context;
use crate::output::{format_outbounds, print_error, print_success};
use xr_core::traits::EntityStore;
use xr_core::{Outbound, OutboundDetails, OutboundId, ServerId, XrError};

/// Fields describing a new outbound
#[derive(Debug, Args)]
pub struct OutboundSpec {
    /// Server the outbound belongs to
    #[arg(long)]
    pub server: i64,
    /// Display name
    pub name: String,
    #[arg(long, default_value = "freedom")]
    pub protocol: String,
    /// Settings as a JSON object
    #[arg(long, conflicts_with = "settings_file")]
    pub settings: Option<String>,
    /// Read settings from a file
    #[arg(long)]
    pub settings_file: Option<std::path::PathBuf>,
    /// Create the outbound disabled
    #[arg(long)]
    pub disabled: bool,
}

/// Fields to change on an outbound; unset fields keep their value
#[derive(Debug, Args)]
pub struct OutboundPatch {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub protocol: Option<String>,
    #[arg(long, conflicts_with = "settings_file")]
    pub settings: Option<String>,
    #[arg(long)]
    pub settings_file: Option<std::path::PathBuf>,
}

/// List a server's outbounds
pub async fn outbound_list(ctx: &Context, server: ServerId) -> Result<()> {
    let outbounds = ctx.store().list_outbounds(server).await?;
    println!("{}", format_outbounds(&outbounds));
    Ok(())
}

/// Create an outbound and rewrite its server's routing document
pub async fn outbound_add(ctx: &Context, spec: OutboundSpec) -> Result<()> {
    let settings =
        read_settings(spec.settings, spec.settings_file.as_deref())?.unwrap_or_default();
    let server = ServerId(spec.server);
    let details = OutboundDetails {
        name: spec.name,
        protocol: spec.protocol,
        settings,
        enabled: !spec.disabled,
    };

    let fleet = ctx.editor()?;
    let result = fleet.add_outbound(server, details, ctx.actor()).await;
    ctx.save().await?;

    match result {
        Ok(outbound) => {
            print_success(&format!(
                "Added outbound {} ({}) to server {}",
                outbound.id, outbound.name, server
            ));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to add outbound: {}", e));
            Err(e.into())
        }
    }
}

/// Change an outbound and rewrite its server's routing document
pub async fn outbound_update(ctx: &Context, id: OutboundId, patch: OutboundPatch) -> Result<()> {
    let mut details = ctx.store().get_outbound(id).await?.details();
    if let Some(name) = patch.name {
        details.name = name;
    }
    if let Some(protocol) = patch.protocol {
        details.protocol = protocol;
    }
    if let Some(settings) = read_settings(patch.settings, patch.settings_file.as_deref())? {
        details.settings = settings;
    }

    let fleet = ctx.editor()?;
    let result = fleet.update_outbound(id, details, ctx.actor()).await;
    ctx.save().await?;
    report(result, "Updated", id)
}

/// Enable or disable an outbound
pub async fn outbound_set_enabled(ctx: &Context, id: OutboundId, enabled: bool) -> Result<()> {
    let fleet = ctx.editor()?;
    let result = fleet.set_outbound_enabled(id, enabled, ctx.actor()).await;
    ctx.save().await?;
    report(result, if enabled { "Enabled" } else { "Disabled" }, id)
}

/// Remove an outbound and rewrite its server's routing document
pub async fn outbound_delete(ctx: &Context, id: OutboundId) -> Result<()> {
    let fleet = ctx.editor()?;
    let result = fleet.delete_outbound(id, ctx.actor()).await;
    ctx.save().await?;
    report(result, "Deleted", id)
}

fn report(result: Result<Outbound, XrError>, verb: &str, id: OutboundId) -> Result<()> {
    match result {
        Ok(outbound) => {
            print_success(&format!("{} outbound {} ({})", verb, id, outbound.name));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed on outbound {}: {}", id, e));
            Err(e.into())
        }
    }
}
