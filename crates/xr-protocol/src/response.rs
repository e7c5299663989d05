//! Agent response type

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::session::DaemonSessionId;

/// Structured result returned by every agent endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    /// Whether the agent carried out the command
    pub success: bool,
    /// Human-readable detail, mostly set on rejection
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// New session id (`connect`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_id: Option<DaemonSessionId>,
    /// Observed proxy status (`check_status`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Command-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DaemonResponse {
    /// Successful response with no payload
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
            daemon_id: None,
            status: None,
            extra: Map::new(),
        }
    }

    /// Rejection carrying a message
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::ok()
        }
    }

    /// Attach a session id
    pub fn with_daemon_id(mut self, id: DaemonSessionId) -> Self {
        self.daemon_id = Some(id);
        self
    }

    /// Attach an observed status
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Attach a command-specific field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parse a response body.
    ///
    /// Anything other than a JSON object with a boolean `success` field is
    /// rejected as malformed.
    pub fn from_slice(body: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ProtocolError::MalformedResponse(format!("invalid JSON: {}", e)))?;

        if !value.is_object() {
            return Err(ProtocolError::MalformedResponse(
                "expected a JSON object".to_string(),
            ));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::MalformedResponse(e.to_string()))
    }
}
