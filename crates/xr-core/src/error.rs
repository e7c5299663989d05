//! Core error types for Xeray

use std::path::PathBuf;

use thiserror::Error;
use xr_protocol::ProtocolError;

use crate::connectivity::NodeStatus;
use crate::types::{EntityRef, ServerId};

/// Top-level error type for fleet control operations
#[derive(Error, Debug)]
pub enum XrError {
    /// Entity store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration synthesis error
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Agent command error
    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    /// Lifecycle operation not valid in the node's current state
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl XrError {
    /// Whether the caller may retry the whole operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, XrError::Daemon(e) if e.is_retryable())
    }

    /// Whether a referenced entity was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, XrError::Store(StoreError::NotFound(_)))
    }
}

/// Entity store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Referenced record does not exist
    #[error("{0} not found")]
    NotFound(EntityRef),

    /// Another enabled inbound on the node already listens on the port
    #[error("Port {port} is already used by an enabled inbound on server {server_id}")]
    PortInUse { server_id: ServerId, port: u16 },

    /// Storage backend failure
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Routing configuration synthesis errors
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// A settings payload is not a structured document
    #[error("Malformed settings on {entity}: {reason}")]
    MalformedSettings { entity: EntityRef, reason: String },

    /// The document could not be written to its target path
    #[error("Failed to write config to {path:?}: {source}")]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document could not be serialized
    #[error("Failed to render config: {0}")]
    Render(#[from] serde_json::Error),
}

/// Agent command errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaemonError {
    /// Connection failure, timeout or non-2xx HTTP status
    #[error("Transport error: {0}")]
    Transport(String),

    /// Agent response was not well-formed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Agent answered `success: false`
    #[error("Rejected by agent: {0}")]
    RemoteRejected(String),

    /// Command needs a session but the node has none
    #[error("Server {0} has no daemon session")]
    NotConnected(ServerId),
}

impl DaemonError {
    /// Network-level failures are retryable; everything else needs an operator
    pub fn is_retryable(&self) -> bool {
        matches!(self, DaemonError::Transport(_))
    }

    /// Whether the agent could not be reached or understood, as opposed to
    /// an agent that answered and refused
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DaemonError::Transport(_) | DaemonError::Protocol(_))
    }
}

impl From<ProtocolError> for DaemonError {
    fn from(e: ProtocolError) -> Self {
        DaemonError::Protocol(e.to_string())
    }
}

/// Node lifecycle transition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Operation not permitted from the node's current status
    #[error("Cannot {operation} while {status}")]
    InvalidTransition {
        status: NodeStatus,
        operation: &'static str,
    },

    /// Node has no daemon session for a session-bound command
    #[error("Server {0} has no daemon session")]
    NoSession(ServerId),

    /// Node's routing configuration failed to synthesize and is out of date
    #[error("Server {0} has a stale routing configuration")]
    StaleConfig(ServerId),

    /// Lifecycle commands only run through their own operation
    #[error("{0} is a lifecycle command and cannot be run directly")]
    ReservedCommand(String),

    /// Persisted connectivity violates the session invariant
    #[error("A disconnected node cannot hold a daemon session")]
    SessionWhileDisconnected,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
