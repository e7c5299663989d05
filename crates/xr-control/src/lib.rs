//! xr-control: Fleet control plane for Xeray proxy nodes
//!
//! The control plane keeps each node's routing configuration in step with
//! its inbound/outbound records and each node's recorded connectivity in
//! step with its agent:
//!
//! - [`synth`] turns a node's enabled records into its routing document and
//!   writes it atomically to the node's config path.
//! - [`client`] signs commands and delivers them to node agents over HTTP.
//! - [`reconciler`] runs every lifecycle operation under a per-node lock,
//!   driving the [`Connectivity`](xr_core::Connectivity) state machine and
//!   writing the outcome back to the entity store.

pub mod client;
pub mod locks;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod synth;

pub use client::{AgentChannel, DaemonClient, OfflineChannel};
pub use locks::NodeLocks;
pub use reconciler::{FleetReconciler, NodeOutcome};
pub use retry::{retry, ExponentialBackoff};
pub use store::{FileStore, MemoryStore};
pub use synth::{build_document, render_document, synthesize, RoutingDocument};
