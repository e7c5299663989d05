//! Daemon command client
//!
//! Delivers one signed [`DaemonCommand`] per HTTP POST to a node's agent and
//! classifies the outcome. The client never retries; a failed call is
//! reported as exactly one of [`DaemonError`]'s variants and the caller
//! decides what to do with it.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, warn};

use xr_core::config::DaemonConfig;
use xr_core::error::{ConfigError, DaemonError};
use xr_core::time::current_time_secs;
use xr_core::Server;
use xr_protocol::{CommandEnvelope, DaemonCommand, DaemonResponse, Signer, SECRET_HEADER};

/// A way of delivering commands to node agents
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Send `command` to the agent of `node` and return its successful response
    async fn dispatch(
        &self,
        node: &Server,
        command: &DaemonCommand,
    ) -> Result<DaemonResponse, DaemonError>;
}

/// Channel for a control plane with no agent credentials
///
/// Record edits only rewrite routing documents and never reach an agent, so
/// they can run on this. Any command is refused as if the node had no session.
pub struct OfflineChannel;

#[async_trait]
impl AgentChannel for OfflineChannel {
    async fn dispatch(
        &self,
        node: &Server,
        command: &DaemonCommand,
    ) -> Result<DaemonResponse, DaemonError> {
        warn!(server = %node.id, command = command.name(), "No agent credentials configured");
        Err(DaemonError::NotConnected(node.id))
    }
}

/// HTTP client for node agents
pub struct DaemonClient {
    http: Client,
    config: DaemonConfig,
    signer: Signer,
}

impl DaemonClient {
    /// Build a client with the configured secret and request timeout
    pub fn new(config: DaemonConfig) -> Result<Self, ConfigError> {
        if config.secret.is_empty() {
            return Err(ConfigError::MissingField("daemon.secret".to_string()));
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))?;
        let signer = Signer::new(&config.secret);

        Ok(Self {
            http,
            config,
            signer,
        })
    }

    fn url_for(&self, node: &Server, command: &DaemonCommand) -> String {
        format!(
            "{}{}",
            self.config.agent_url(&node.ip_address),
            command.endpoint().path()
        )
    }
}

#[async_trait]
impl AgentChannel for DaemonClient {
    async fn dispatch(
        &self,
        node: &Server,
        command: &DaemonCommand,
    ) -> Result<DaemonResponse, DaemonError> {
        if command.requires_session() && node.session().is_none() {
            return Err(DaemonError::NotConnected(node.id));
        }
        let daemon_id = match command {
            DaemonCommand::Connect(_) => None,
            _ => node.session().cloned(),
        };

        let envelope = CommandEnvelope::seal(
            node.id.as_i64(),
            daemon_id,
            command,
            &self.signer,
            current_time_secs(),
        )?;
        let url = self.url_for(node, command);
        debug!(server_id = %node.id, command = command.name(), url = %url, "Sending agent command");

        let response = self
            .http
            .post(&url)
            .header(SECRET_HEADER, &self.config.secret)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    format!("request to {} timed out", url)
                } else {
                    format!("request to {} failed: {}", url, e)
                };
                warn!(server_id = %node.id, command = command.name(), "{}", reason);
                DaemonError::Transport(reason)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(server_id = %node.id, command = command.name(), %status, "Agent returned error status");
            return Err(DaemonError::Transport(format!("agent returned HTTP {}", status)));
        }

        let body = response.bytes().await.map_err(|e| {
            warn!(server_id = %node.id, command = command.name(), error = %e, "Failed to read agent response");
            DaemonError::Transport(format!("failed to read response from {}: {}", url, e))
        })?;

        let reply = DaemonResponse::from_slice(&body).map_err(|e| {
            error!(server_id = %node.id, command = command.name(), error = %e, "Malformed agent response");
            DaemonError::from(e)
        })?;

        if !reply.success {
            debug!(server_id = %node.id, command = command.name(), message = %reply.message, "Agent rejected command");
            return Err(DaemonError::RemoteRejected(reply.message));
        }
        Ok(reply)
    }
}
