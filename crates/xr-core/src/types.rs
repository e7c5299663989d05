//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::connectivity::{Connectivity, NodeStatus};
use crate::time::current_time_secs;
use xr_protocol::DaemonSessionId;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the raw id value
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Identifier of a managed node
    ServerId
);
entity_id!(
    /// Identifier of an inbound record
    InboundId
);
entity_id!(
    /// Identifier of an outbound record
    OutboundId
);

/// Reference to any stored entity, used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Server(ServerId),
    Inbound(InboundId),
    Outbound(OutboundId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Server(id) => write!(f, "server {}", id),
            EntityRef::Inbound(id) => write!(f, "inbound {}", id),
            EntityRef::Outbound(id) => write!(f, "outbound {}", id),
        }
    }
}

/// Administrator-supplied description of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDetails {
    pub name: String,
    pub location: String,
    pub ip_address: String,
    /// Port the proxy listens on
    pub port: u16,
    /// Transport protocol
    pub protocol: String,
    /// Where the node expects its routing configuration document
    pub config_path: PathBuf,
}

/// A managed proxy node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub location: String,
    pub ip_address: String,
    pub port: u16,
    pub protocol: String,
    pub config_path: PathBuf,
    /// Connectivity status and daemon session
    pub connectivity: Connectivity,
    /// Set when the last re-synthesis after a record change failed
    #[serde(default)]
    pub config_stale: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Server {
    /// Create a fresh, disconnected node record
    pub fn new(id: ServerId, details: ServerDetails) -> Self {
        let now = current_time_secs();
        Self {
            id,
            name: details.name,
            location: details.location,
            ip_address: details.ip_address,
            port: details.port,
            protocol: details.protocol,
            config_path: details.config_path,
            connectivity: Connectivity::default(),
            config_stale: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the administrator-supplied fields
    pub fn apply_details(&mut self, details: ServerDetails) {
        self.name = details.name;
        self.location = details.location;
        self.ip_address = details.ip_address;
        self.port = details.port;
        self.protocol = details.protocol;
        self.config_path = details.config_path;
    }

    /// Current administrator-supplied fields
    pub fn details(&self) -> ServerDetails {
        ServerDetails {
            name: self.name.clone(),
            location: self.location.clone(),
            ip_address: self.ip_address.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
            config_path: self.config_path.clone(),
        }
    }

    /// Recorded connectivity status
    pub fn status(&self) -> &NodeStatus {
        self.connectivity.status()
    }

    /// Active daemon session, if any
    pub fn session(&self) -> Option<&DaemonSessionId> {
        self.connectivity.session()
    }
}

/// Administrator-supplied description of an inbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundDetails {
    pub name: String,
    /// Proxy protocol type (vless, vmess, trojan, ...)
    pub protocol: String,
    pub port: u16,
    /// Protocol-specific settings as stored (JSON text)
    pub settings: String,
    pub enabled: bool,
}

/// A listening endpoint on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub id: InboundId,
    pub server_id: ServerId,
    pub name: String,
    pub protocol: String,
    pub port: u16,
    pub settings: String,
    pub enabled: bool,
}

impl Inbound {
    /// Build a record from its details
    pub fn new(id: InboundId, server_id: ServerId, details: InboundDetails) -> Self {
        Self {
            id,
            server_id,
            name: details.name,
            protocol: details.protocol,
            port: details.port,
            settings: details.settings,
            enabled: details.enabled,
        }
    }

    /// Current administrator-supplied fields
    pub fn details(&self) -> InboundDetails {
        InboundDetails {
            name: self.name.clone(),
            protocol: self.protocol.clone(),
            port: self.port,
            settings: self.settings.clone(),
            enabled: self.enabled,
        }
    }
}

/// Administrator-supplied description of an outbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundDetails {
    pub name: String,
    /// Outbound type (freedom, blackhole, vless, ...)
    pub protocol: String,
    /// Type-specific settings as stored (JSON text)
    pub settings: String,
    pub enabled: bool,
}

/// An egress route on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub id: OutboundId,
    pub server_id: ServerId,
    pub name: String,
    pub protocol: String,
    pub settings: String,
    pub enabled: bool,
}

impl Outbound {
    /// Build a record from its details
    pub fn new(id: OutboundId, server_id: ServerId, details: OutboundDetails) -> Self {
        Self {
            id,
            server_id,
            name: details.name,
            protocol: details.protocol,
            settings: details.settings,
            enabled: details.enabled,
        }
    }

    /// Current administrator-supplied fields
    pub fn details(&self) -> OutboundDetails {
        OutboundDetails {
            name: self.name.clone(),
            protocol: self.protocol.clone(),
            settings: self.settings.clone(),
            enabled: self.enabled,
        }
    }
}

/// Principal on whose behalf an operation runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    /// Network origin of the administrative request
    pub origin: Option<String>,
}

impl Actor {
    /// Actor for a request arriving from `origin`
    pub fn from_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
        }
    }

    /// Actor for operations with no request origin
    pub fn system() -> Self {
        Self::default()
    }
}

/// Append-only audit record of a lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub server_id: Option<ServerId>,
    pub action: String,
    pub details: String,
    pub origin: Option<String>,
    pub created_at: u64,
}

impl AuditEntry {
    /// Record `action` now on behalf of `actor`
    pub fn new(
        action: impl Into<String>,
        details: impl Into<String>,
        server_id: Option<ServerId>,
        actor: &Actor,
    ) -> Self {
        Self {
            server_id,
            action: action.into(),
            details: details.into(),
            origin: actor.origin.clone(),
            created_at: current_time_secs(),
        }
    }
}
