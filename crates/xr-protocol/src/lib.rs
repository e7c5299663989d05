//! xr-protocol: Wire protocol between the control plane and node agents
//!
//! Every request the control plane makes against a node agent is a
//! JSON [`CommandEnvelope`] POSTed to one of the agent endpoints. The
//! envelope carries a [`DaemonCommand`] split into its name and parameter
//! payload, an HMAC-SHA256 signature over the serialized parameters, and
//! the Unix timestamp of the call. Agents answer with a [`DaemonResponse`].

pub mod auth;
pub mod command;
pub mod envelope;
pub mod error;
pub mod response;
pub mod session;

pub use auth::{validate_secret, Signer};
pub use command::{ConnectParams, DaemonCommand, Endpoint};
pub use envelope::CommandEnvelope;
pub use error::ProtocolError;
pub use response::DaemonResponse;
pub use session::DaemonSessionId;

/// Header carrying the shared secret on every agent request
pub const SECRET_HEADER: &str = "X-Daemon-Secret";

/// Port agents listen on unless configured otherwise
pub const DEFAULT_AGENT_PORT: u16 = 8080;
