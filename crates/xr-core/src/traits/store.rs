//! Entity store contract

use async_trait::async_trait;

use crate::connectivity::Connectivity;
use crate::error::StoreError;
use crate::types::{
    AuditEntry, Inbound, InboundDetails, InboundId, Outbound, OutboundDetails, OutboundId, Server,
    ServerDetails, ServerId,
};

/// Persistent storage of nodes, their inbound/outbound records and the audit trail
///
/// Listing operations return records in id order; synthesis emits blocks in
/// that order, so implementations must keep it stable.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a node
    async fn get_server(&self, id: ServerId) -> Result<Server, StoreError>;

    /// All nodes
    async fn list_servers(&self) -> Result<Vec<Server>, StoreError>;

    /// Create a disconnected node
    async fn insert_server(&self, details: ServerDetails) -> Result<Server, StoreError>;

    /// Replace a node's administrator-supplied fields
    async fn update_server(
        &self,
        id: ServerId,
        details: ServerDetails,
    ) -> Result<Server, StoreError>;

    /// Record a node's connectivity and bump `updated_at`
    async fn save_connectivity(
        &self,
        id: ServerId,
        connectivity: &Connectivity,
    ) -> Result<Server, StoreError>;

    /// Mark whether the node's routing document is out of date
    async fn set_config_stale(&self, id: ServerId, stale: bool) -> Result<(), StoreError>;

    /// Remove a node together with its inbounds and outbounds
    async fn delete_server(&self, id: ServerId) -> Result<(), StoreError>;

    /// Inbounds of a node
    async fn list_inbounds(&self, server_id: ServerId) -> Result<Vec<Inbound>, StoreError>;

    async fn get_inbound(&self, id: InboundId) -> Result<Inbound, StoreError>;

    /// Create an inbound, rejecting a port already used by another enabled
    /// inbound of the same node
    async fn insert_inbound(
        &self,
        server_id: ServerId,
        details: InboundDetails,
    ) -> Result<Inbound, StoreError>;

    /// Replace an inbound, with the same port check as insertion
    async fn update_inbound(
        &self,
        id: InboundId,
        details: InboundDetails,
    ) -> Result<Inbound, StoreError>;

    async fn delete_inbound(&self, id: InboundId) -> Result<Inbound, StoreError>;

    /// Outbounds of a node
    async fn list_outbounds(&self, server_id: ServerId) -> Result<Vec<Outbound>, StoreError>;

    async fn get_outbound(&self, id: OutboundId) -> Result<Outbound, StoreError>;

    async fn insert_outbound(
        &self,
        server_id: ServerId,
        details: OutboundDetails,
    ) -> Result<Outbound, StoreError>;

    async fn update_outbound(
        &self,
        id: OutboundId,
        details: OutboundDetails,
    ) -> Result<Outbound, StoreError>;

    async fn delete_outbound(&self, id: OutboundId) -> Result<Outbound, StoreError>;

    /// Append an audit record
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Audit records, newest last, optionally for one node
    async fn list_audit(&self, server_id: Option<ServerId>) -> Result<Vec<AuditEntry>, StoreError>;
}
