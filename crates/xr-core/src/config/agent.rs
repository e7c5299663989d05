//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the node agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the agent HTTP server binds to
    pub bind_address: String,

    /// Pre-shared secret expected in the header and used to verify signatures
    pub secret: String,

    /// Command whose exit status tells whether the proxy is running,
    /// e.g. `["systemctl", "is-active", "--quiet", "xray"]`
    pub status_command: Option<Vec<String>>,

    /// Command that restarts the proxy service
    pub restart_command: Option<Vec<String>>,

    /// File the agent keeps its bindings in, so they survive a restart.
    /// Unset keeps bindings in memory only.
    pub state_path: Option<PathBuf>,

    /// A binding without a heartbeat for this long is marked offline
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// How often bindings are checked for missed heartbeats
    #[serde(with = "duration_secs")]
    pub monitor_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", xr_protocol::DEFAULT_AGENT_PORT),
            secret: String::new(),
            status_command: None,
            restart_command: None,
            state_path: None,
            heartbeat_timeout: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(60),
        }
    }
}
