//! Agent command types
//!
//! [`DaemonCommand`] is the typed form of everything the control plane can
//! ask an agent to do. On the wire a command is split into an [`Endpoint`],
//! a command name and a JSON parameter payload; [`DaemonCommand::params`]
//! and [`DaemonCommand::decode`] are the two directions of that boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Agent HTTP endpoint a command is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /connect`
    Connect,
    /// `POST /disconnect`
    Disconnect,
    /// `POST /command` (generic dispatch)
    Command,
}

impl Endpoint {
    /// Request path of this endpoint
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Connect => "/connect",
            Endpoint::Disconnect => "/disconnect",
            Endpoint::Command => "/command",
        }
    }
}

/// Node identity and address sent with `connect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub server_id: i64,
    pub server_name: String,
    pub server_ip: String,
    pub server_port: u16,
    pub config_path: String,
}

/// A command addressed to a node agent
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonCommand {
    /// Establish a new control session
    Connect(ConnectParams),
    /// Tear down the control session
    Disconnect,
    /// Ask the agent for the proxy process status
    CheckStatus,
    /// Restart the proxy process
    RestartXray,
    /// Any other agent command, dispatched by name
    Named {
        name: String,
        params: Map<String, Value>,
    },
}

impl DaemonCommand {
    pub const CONNECT: &'static str = "connect";
    pub const DISCONNECT: &'static str = "disconnect";
    pub const CHECK_STATUS: &'static str = "check_status";
    pub const RESTART_XRAY: &'static str = "restart_xray";

    /// Build a generic named command
    pub fn named(name: impl Into<String>, params: Map<String, Value>) -> Self {
        DaemonCommand::Named {
            name: name.into(),
            params,
        }
    }

    /// Wire name of the command
    pub fn name(&self) -> &str {
        match self {
            DaemonCommand::Connect(_) => Self::CONNECT,
            DaemonCommand::Disconnect => Self::DISCONNECT,
            DaemonCommand::CheckStatus => Self::CHECK_STATUS,
            DaemonCommand::RestartXray => Self::RESTART_XRAY,
            DaemonCommand::Named { name, .. } => name,
        }
    }

    /// Endpoint the command is POSTed to
    pub fn endpoint(&self) -> Endpoint {
        match self {
            DaemonCommand::Connect(_) => Endpoint::Connect,
            DaemonCommand::Disconnect => Endpoint::Disconnect,
            _ => Endpoint::Command,
        }
    }

    /// Whether the envelope must carry a session id from a prior `connect`.
    ///
    /// `disconnect` sends the session id when one is known but may also be
    /// issued without one.
    pub fn requires_session(&self) -> bool {
        !matches!(self, DaemonCommand::Connect(_) | DaemonCommand::Disconnect)
    }

    /// Encode the parameter payload
    pub fn params(&self) -> Result<Value, ProtocolError> {
        match self {
            DaemonCommand::Connect(params) => Ok(serde_json::to_value(params)?),
            DaemonCommand::Named { params, .. } => Ok(Value::Object(params.clone())),
            _ => Ok(Value::Object(Map::new())),
        }
    }

    /// Decode a command received on `endpoint`
    pub fn decode(
        endpoint: Endpoint,
        command: Option<&str>,
        params: Value,
    ) -> Result<Self, ProtocolError> {
        match endpoint {
            Endpoint::Connect => serde_json::from_value(params)
                .map(DaemonCommand::Connect)
                .map_err(|e| ProtocolError::InvalidParams {
                    command: Self::CONNECT.to_string(),
                    reason: e.to_string(),
                }),
            Endpoint::Disconnect => Ok(DaemonCommand::Disconnect),
            Endpoint::Command => {
                let name = command.ok_or_else(|| ProtocolError::InvalidParams {
                    command: "<none>".to_string(),
                    reason: "missing command name".to_string(),
                })?;
                match name {
                    Self::CHECK_STATUS => Ok(DaemonCommand::CheckStatus),
                    Self::RESTART_XRAY => Ok(DaemonCommand::RestartXray),
                    Self::CONNECT | Self::DISCONNECT => {
                        Err(ProtocolError::UnknownCommand(format!(
                            "{} is not dispatched through /command",
                            name
                        )))
                    }
                    _ => match params {
                        Value::Object(map) => Ok(DaemonCommand::named(name, map)),
                        Value::Null => Ok(DaemonCommand::named(name, Map::new())),
                        other => Err(ProtocolError::InvalidParams {
                            command: name.to_string(),
                            reason: format!("expected an object, got {}", other),
                        }),
                    },
                }
            }
        }
    }
}
