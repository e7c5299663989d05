//! CLI command implementations

mod config;
mod inbound;
mod node;
mod outbound;

use std::path::Path;

use anyhow::{Context as _, Result};

use crate::context::Context;
use crate::output::format_audit;
use xr_core::traits::EntityStore;
use xr_core::ServerId;

pub use config::{config_init, config_path, config_show};
pub use inbound::{
    inbound_add, inbound_delete, inbound_list, inbound_set_enabled, inbound_update, InboundPatch,
    InboundSpec,
};
pub use node::{
    node_add, node_delete, node_disconnect, node_exec, node_list, node_poll, node_restart,
    node_update, NodePatch, NodeSpec,
};
pub use outbound::{
    outbound_add, outbound_delete, outbound_list, outbound_set_enabled, outbound_update,
    OutboundPatch, OutboundSpec,
};

/// Print a server's routing document as it would be written
pub async fn render_command(ctx: &Context, id: ServerId) -> Result<()> {
    ctx.store().get_server(id).await?;
    let document = xr_control::render_document(ctx.store(), id).await?;
    print!("{}", document.render()?);
    Ok(())
}

/// Print audit entries, optionally for one server and only the latest `limit`
pub async fn audit_command(
    ctx: &Context,
    server: Option<ServerId>,
    limit: Option<usize>,
) -> Result<()> {
    let mut entries = ctx.store().list_audit(server).await?;
    if let Some(limit) = limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    println!("{}", format_audit(&entries));
    Ok(())
}

/// Settings text from an inline value or a file, if either was given
fn read_settings(inline: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match (inline, file) {
        (Some(text), _) => Ok(Some(text)),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("Failed to read settings file: {:?}", path)),
        (None, None) => Ok(None),
    }
}
