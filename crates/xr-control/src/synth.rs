//! Routing configuration synthesis
//!
//! A node's routing document is derived entirely from its enabled inbound
//! and outbound records:
//!
//! ```json
//! { "inbounds": [ ... ], "outbounds": [ ... ] }
//! ```
//!
//! Each inbound block is the record's settings object with `port` and
//! `protocol` set from the record's own columns; each outbound block is the
//! settings object with `protocol` set. Columns override same-named keys in
//! the settings. Blocks follow store order and object keys serialize
//! sorted, so the same records always render to the same bytes.

use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use xr_core::error::SynthesisError;
use xr_core::traits::EntityStore;
use xr_core::{EntityRef, Inbound, Outbound, ServerId, XrError};

/// The derived routing configuration of one node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingDocument {
    pub inbounds: Vec<Value>,
    pub outbounds: Vec<Value>,
}

impl RoutingDocument {
    /// Canonical pretty-printed JSON with a trailing newline
    pub fn render(&self) -> Result<String, SynthesisError> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }
}

/// Parse a stored settings payload, which must be a JSON object
pub fn parse_settings(entity: EntityRef, settings: &str) -> Result<Map<String, Value>, SynthesisError> {
    // An empty payload means "no extra settings"
    if settings.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(settings) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SynthesisError::MalformedSettings {
            entity,
            reason: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
        Err(e) => Err(SynthesisError::MalformedSettings {
            entity,
            reason: e.to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn inbound_block(inbound: &Inbound) -> Result<Value, SynthesisError> {
    let mut block = parse_settings(EntityRef::Inbound(inbound.id), &inbound.settings)?;
    block.insert("port".to_string(), Value::from(inbound.port));
    block.insert("protocol".to_string(), Value::from(inbound.protocol.clone()));
    Ok(Value::Object(block))
}

fn outbound_block(outbound: &Outbound) -> Result<Value, SynthesisError> {
    let mut block = parse_settings(EntityRef::Outbound(outbound.id), &outbound.settings)?;
    block.insert("protocol".to_string(), Value::from(outbound.protocol.clone()));
    Ok(Value::Object(block))
}

/// Build the document from a node's records, skipping disabled ones.
///
/// Fails on the first malformed settings payload.
pub fn build_document(
    inbounds: &[Inbound],
    outbounds: &[Outbound],
) -> Result<RoutingDocument, SynthesisError> {
    let inbounds = inbounds
        .iter()
        .filter(|i| i.enabled)
        .map(inbound_block)
        .collect::<Result<Vec<_>, _>>()?;
    let outbounds = outbounds
        .iter()
        .filter(|o| o.enabled)
        .map(outbound_block)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RoutingDocument {
        inbounds,
        outbounds,
    })
}

/// Fetch a node's records and build its document without writing it
pub async fn render_document(
    store: &dyn EntityStore,
    server_id: ServerId,
) -> Result<RoutingDocument, XrError> {
    let inbounds = store.list_inbounds(server_id).await?;
    let outbounds = store.list_outbounds(server_id).await?;
    Ok(build_document(&inbounds, &outbounds)?)
}

/// Build a node's document and write it to `path`
pub async fn synthesize(
    store: &dyn EntityStore,
    server_id: ServerId,
    path: &Path,
) -> Result<RoutingDocument, XrError> {
    let document = render_document(store, server_id).await?;
    let text = document.render()?;
    write_atomic(path, text.as_bytes())?;

    info!(
        server_id = %server_id,
        path = %path.display(),
        inbounds = document.inbounds.len(),
        outbounds = document.outbounds.len(),
        "Routing configuration written"
    );
    Ok(document)
}

/// Replace the file at `path` with `content` in one rename
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), SynthesisError> {
    write_atomic_with(path, |file| file.write_all(content))
}

/// Like [`write_atomic`], with the caller writing the temp file.
///
/// If `fill` fails the temp file is discarded and the target is left as it was.
pub fn write_atomic_with<F>(path: &Path, fill: F) -> Result<(), SynthesisError>
where
    F: FnOnce(&mut tempfile::NamedTempFile) -> io::Result<()>,
{
    let write_failed = |source: io::Error| SynthesisError::ConfigWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_failed)?;

    // Temp file in the same directory so the rename stays on one filesystem
    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_failed)?;
    fill(&mut temp).map_err(write_failed)?;
    temp.as_file().sync_all().map_err(write_failed)?;
    temp.persist(path).map_err(|e| write_failed(e.error))?;

    debug!(path = %path.display(), "Atomically replaced file");
    Ok(())
}
