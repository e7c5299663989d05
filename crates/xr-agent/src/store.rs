//! On-disk agent files
//!
//! Bindings are kept as one JSON object keyed by server id. Both the binding
//! file and pushed proxy configs are replaced atomically, so a crash never
//! leaves a half-written file behind.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::state::Binding;

/// Load saved bindings, or none if the file does not exist yet
pub fn load_bindings(path: &Path) -> Result<BTreeMap<i64, Binding>> {
    if !path.exists() {
        debug!(path = %path.display(), "No binding file, starting empty");
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn save_bindings(path: &Path, bindings: &BTreeMap<i64, Binding>) -> Result<()> {
    let content = serde_json::to_vec_pretty(bindings).context("Failed to serialize bindings")?;
    write_atomic(path, &content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Replace `path` with `content` through a temp file in the same directory
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
