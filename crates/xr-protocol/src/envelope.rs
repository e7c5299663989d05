//! Signed command envelope
//!
//! The envelope is the JSON request body of every agent call. It is built
//! per call and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Signer;
use crate::command::{DaemonCommand, Endpoint};
use crate::error::ProtocolError;
use crate::session::DaemonSessionId;

/// Request body sent to an agent endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Control-plane id of the target node
    pub server_id: i64,
    /// Session id from a prior `connect`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_id: Option<DaemonSessionId>,
    /// Command name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command parameters
    #[serde(default)]
    pub params: Value,
    /// Unix timestamp (seconds) when the envelope was sealed
    pub timestamp: u64,
    /// Hex HMAC-SHA256 over the serialized `params`
    pub signature: String,
}

impl CommandEnvelope {
    /// Encode and sign a command
    pub fn seal(
        server_id: i64,
        daemon_id: Option<DaemonSessionId>,
        command: &DaemonCommand,
        signer: &Signer,
        timestamp: u64,
    ) -> Result<Self, ProtocolError> {
        let params = command.params()?;
        let signature = signer.sign_params(&params)?;

        Ok(Self {
            server_id,
            daemon_id,
            command: Some(command.name().to_string()),
            params,
            timestamp,
            signature,
        })
    }

    /// Check the signature against the shared secret
    pub fn verify(&self, signer: &Signer) -> bool {
        signer.verify_params(&self.params, &self.signature)
    }

    /// Decode the carried command as received on `endpoint`
    pub fn open(&self, endpoint: Endpoint) -> Result<DaemonCommand, ProtocolError> {
        DaemonCommand::decode(endpoint, self.command.as_deref(), self.params.clone())
    }
}
