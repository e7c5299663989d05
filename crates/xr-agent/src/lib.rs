//! xr-agent: Node agent for Xeray
//!
//! The agent runs next to the proxy on every node. It accepts signed
//! commands from the control plane over HTTP, keeps one control binding
//! (daemon session) per server id, and probes or restarts the local proxy
//! service on request. Bindings can be saved to a file and are marked
//! offline once the control plane stops polling them.

pub mod monitor;
pub mod server;
pub mod state;
pub mod store;
pub mod xray;

pub use monitor::run_heartbeat_monitor;
pub use server::router;
pub use state::AgentState;
