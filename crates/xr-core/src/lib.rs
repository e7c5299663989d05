//! xr-core: Core abstractions and configuration for Xeray fleet control
//!
//! This crate provides the domain types shared by the control plane, the
//! node agent and the CLI: the node aggregate and its connectivity state
//! machine, inbound/outbound records, the error taxonomy, configuration
//! files, and the [`EntityStore`](traits::EntityStore) contract the control
//! plane consumes.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use connectivity::{Connectivity, NodeStatus};
pub use error::XrError;
pub use types::{
    Actor, AuditEntry, EntityRef, Inbound, InboundDetails, InboundId, Outbound, OutboundDetails,
    OutboundId, Server, ServerDetails, ServerId,
};
pub use xr_protocol::DaemonSessionId;
