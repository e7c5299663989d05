//! Local proxy service control

use std::path::Path;
use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::store::write_atomic;

/// Probes and restarts the local proxy through configured commands
///
/// Without a status command the proxy is reported `online`; without a
/// restart command a restart is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ProxyControl {
    status_command: Option<Vec<String>>,
    restart_command: Option<Vec<String>>,
}

impl ProxyControl {
    pub fn new(status_command: Option<Vec<String>>, restart_command: Option<Vec<String>>) -> Self {
        Self {
            status_command,
            restart_command,
        }
    }

    /// `online` if the status command exits successfully, `offline` otherwise
    pub async fn probe(&self) -> &'static str {
        let Some(argv) = &self.status_command else {
            return "online";
        };
        match run(argv).await {
            Ok(()) => "online",
            Err(reason) => {
                debug!(%reason, "Status probe failed");
                "offline"
            }
        }
    }

    /// Run the restart command
    pub async fn restart(&self) -> Result<(), String> {
        let Some(argv) = &self.restart_command else {
            debug!("No restart command configured");
            return Ok(());
        };
        run(argv).await.map_err(|reason| {
            warn!(%reason, "Proxy restart failed");
            reason
        })
    }

    /// Replace the proxy config at `path` with `document`, then restart
    ///
    /// The file is written atomically. If the write fails the proxy is not
    /// restarted.
    pub async fn apply_config(&self, path: &Path, document: &Value) -> Result<(), String> {
        let content = serde_json::to_vec_pretty(document)
            .map_err(|e| format!("failed to encode config: {}", e))?;
        write_atomic(path, &content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        info!(path = %path.display(), bytes = content.len(), "Proxy config replaced");
        self.restart().await
    }
}

async fn run(argv: &[String]) -> Result<(), String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("failed to run {}: {}", program, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("{} exited with {}", program, status))
    }
}
