//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding agent traffic
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Signing key was rejected by the MAC implementation
    #[error("Invalid signing key")]
    InvalidKey,

    /// Command name not understood at the decode boundary
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Command parameters did not have the expected shape
    #[error("Invalid parameters for {command}: {reason}")]
    InvalidParams { command: String, reason: String },

    /// Agent response was not a well-formed result object
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
