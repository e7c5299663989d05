//! Node connectivity state machine
//!
//! A node's recorded status and its daemon session move together. Every
//! lifecycle operation in the control plane goes through the transitions
//! defined here, so the pair can never reach an inconsistent state:
//! a node that is `Disconnected` never holds a session.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DaemonError, TransitionError};
use crate::types::ServerId;
use xr_protocol::DaemonSessionId;

/// Recorded connectivity status of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    /// No agent session
    #[default]
    Disconnected,
    /// A connect handshake is in flight
    Connecting,
    /// Agent acknowledged the handshake
    Connected,
    /// A proxy restart is in flight
    Restarting,
    /// Agent could not be reached
    Offline,
    /// Free-form status reported by the agent on poll
    Reported(String),
}

impl NodeStatus {
    /// Wire and storage name of the status
    pub fn as_str(&self) -> &str {
        match self {
            NodeStatus::Disconnected => "disconnected",
            NodeStatus::Connecting => "connecting",
            NodeStatus::Connected => "connected",
            NodeStatus::Restarting => "restarting",
            NodeStatus::Offline => "offline",
            NodeStatus::Reported(s) => s,
        }
    }

    /// Whether the status only exists while an operation is running
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeStatus::Connecting | NodeStatus::Restarting)
    }

    /// Whether a restart may be attempted from this status
    pub fn permits_restart(&self) -> bool {
        matches!(
            self,
            NodeStatus::Connected | NodeStatus::Offline | NodeStatus::Reported(_)
        )
    }

    /// Whether the node may be polled
    pub fn permits_poll(&self) -> bool {
        !matches!(self, NodeStatus::Disconnected)
    }
}

impl From<String> for NodeStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "disconnected" => NodeStatus::Disconnected,
            "connecting" => NodeStatus::Connecting,
            "connected" => NodeStatus::Connected,
            "restarting" => NodeStatus::Restarting,
            "offline" => NodeStatus::Offline,
            _ => NodeStatus::Reported(s),
        }
    }
}

impl From<&str> for NodeStatus {
    fn from(s: &str) -> Self {
        NodeStatus::from(s.to_string())
    }
}

impl From<NodeStatus> for String {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Reported(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted shape of [`Connectivity`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConnectivityRecord {
    status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    daemon_id: Option<DaemonSessionId>,
}

/// Status and daemon session of a node, changed only through transitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConnectivityRecord", into = "ConnectivityRecord")]
pub struct Connectivity {
    status: NodeStatus,
    session: Option<DaemonSessionId>,
}

impl TryFrom<ConnectivityRecord> for Connectivity {
    type Error = TransitionError;

    fn try_from(record: ConnectivityRecord) -> Result<Self, Self::Error> {
        Connectivity::restore(record.status, record.daemon_id)
    }
}

impl From<Connectivity> for ConnectivityRecord {
    fn from(c: Connectivity) -> Self {
        ConnectivityRecord {
            status: c.status,
            daemon_id: c.session,
        }
    }
}

impl Connectivity {
    /// Rebuild from persisted parts, rejecting a session on a disconnected node
    pub fn restore(
        status: NodeStatus,
        session: Option<DaemonSessionId>,
    ) -> Result<Self, TransitionError> {
        if status == NodeStatus::Disconnected && session.is_some() {
            return Err(TransitionError::SessionWhileDisconnected);
        }
        Ok(Self { status, session })
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub fn session(&self) -> Option<&DaemonSessionId> {
        self.session.as_ref()
    }

    /// Handshake started. Any previous session stays until replaced.
    pub fn begin_connect(&mut self) {
        self.status = NodeStatus::Connecting;
    }

    /// Agent acknowledged the handshake and issued `session`
    pub fn connect_succeeded(&mut self, session: DaemonSessionId) {
        self.status = NodeStatus::Connected;
        self.session = Some(session);
    }

    /// Handshake failed. `prior` is the status before [`begin_connect`](Self::begin_connect).
    pub fn connect_failed(&mut self, prior: NodeStatus, err: &DaemonError) {
        if err.is_unreachable() {
            self.status = if self.session.is_some() {
                NodeStatus::Offline
            } else {
                NodeStatus::Disconnected
            };
        } else {
            self.status = prior;
            self.settle();
        }
    }

    /// Start a restart, checking the status allows it and a session exists
    pub fn begin_restart(&mut self, server_id: ServerId) -> Result<NodeStatus, TransitionError> {
        if !self.status.permits_restart() {
            return Err(TransitionError::InvalidTransition {
                status: self.status.clone(),
                operation: "restart",
            });
        }
        if self.session.is_none() {
            return Err(TransitionError::NoSession(server_id));
        }
        let prior = std::mem::replace(&mut self.status, NodeStatus::Restarting);
        Ok(prior)
    }

    pub fn restart_succeeded(&mut self) {
        self.status = NodeStatus::Connected;
    }

    /// Restart failed. An agent that refused keeps the prior status.
    pub fn restart_failed(&mut self, prior: NodeStatus, err: &DaemonError) {
        match err {
            DaemonError::RemoteRejected(_) => {
                self.status = prior;
                self.settle();
            }
            _ => self.status = NodeStatus::Offline,
        }
    }

    /// Check the node may be polled
    pub fn check_poll(&self) -> Result<(), TransitionError> {
        if self.status.permits_poll() {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                status: self.status.clone(),
                operation: "poll",
            })
        }
    }

    /// Agent reported its status on poll
    ///
    /// A transient report ("connecting", "restarting") describes the agent's
    /// own work in progress. The agent answered, so the node is recorded as
    /// connected rather than left in a transient status.
    pub fn status_observed(&mut self, reported: &str) {
        let status = match NodeStatus::from(reported) {
            status if status.is_transient() => NodeStatus::Connected,
            status => status,
        };
        if status == NodeStatus::Disconnected {
            self.session = None;
        }
        self.status = status;
    }

    /// Agent could not be reached on poll
    pub fn status_unreachable(&mut self) {
        self.status = NodeStatus::Offline;
    }

    /// Agent refused the poll
    pub fn poll_rejected(&mut self) {
        self.settle();
    }

    /// Polled a node with no session; it can never answer
    pub fn abandon_connect(&mut self) {
        self.status = NodeStatus::Disconnected;
        self.session = None;
    }

    pub fn disconnect_succeeded(&mut self) {
        self.status = NodeStatus::Disconnected;
        self.session = None;
    }

    /// Disconnect failed; an unreachable node with a session goes offline
    pub fn disconnect_failed(&mut self, err: &DaemonError) {
        if err.is_unreachable() && self.session.is_some() {
            self.status = NodeStatus::Offline;
        } else if err.is_unreachable() {
            self.status = NodeStatus::Disconnected;
        } else {
            self.settle();
        }
    }

    /// Resolve a leftover transient status after an operation ended
    fn settle(&mut self) {
        if self.status.is_transient() {
            self.status = if self.session.is_some() {
                NodeStatus::Connected
            } else {
                NodeStatus::Disconnected
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(id: &str) -> Connectivity {
        let mut c = Connectivity::default();
        c.begin_connect();
        c.connect_succeeded(DaemonSessionId::new(id));
        c
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for name in ["disconnected", "connecting", "connected", "restarting", "offline"] {
            let status = NodeStatus::from(name);
            assert!(!matches!(status, NodeStatus::Reported(_)));
            assert_eq!(status.as_str(), name);
        }
        assert_eq!(
            NodeStatus::from("online"),
            NodeStatus::Reported("online".to_string())
        );
    }

    #[test]
    fn test_transient_report_settles_to_connected() {
        for reported in ["connecting", "restarting"] {
            let mut c = connected("daemon_1_ab");
            c.status_observed(reported);
            assert_eq!(c.status(), &NodeStatus::Connected);
            assert!(!c.status().is_transient());
            assert!(c.status().permits_restart());
            assert!(c.session().is_some());
        }

        let mut c = connected("daemon_1_ab");
        c.status_observed("online");
        assert_eq!(c.status(), &NodeStatus::Reported("online".to_string()));
    }

    #[test]
    fn test_connect_success_stores_session() {
        let c = connected("daemon_1_ab");
        assert_eq!(c.status(), &NodeStatus::Connected);
        assert_eq!(c.session().map(|s| s.as_str()), Some("daemon_1_ab"));
    }

    #[test]
    fn test_unreachable_connect_without_session_is_disconnected() {
        let mut c = Connectivity::default();
        let prior = c.status().clone();
        c.begin_connect();
        c.connect_failed(prior, &DaemonError::Transport("refused".into()));
        assert_eq!(c.status(), &NodeStatus::Disconnected);
        assert!(c.session().is_none());
    }

    #[test]
    fn test_unreachable_connect_with_session_is_offline() {
        let mut c = connected("daemon_1_ab");
        let prior = c.status().clone();
        c.begin_connect();
        c.connect_failed(prior, &DaemonError::Transport("timeout".into()));
        assert_eq!(c.status(), &NodeStatus::Offline);
        assert!(c.session().is_some());
    }

    #[test]
    fn test_rejected_connect_restores_prior() {
        let mut c = connected("daemon_1_ab");
        c.status_unreachable();
        let prior = c.status().clone();
        c.begin_connect();
        c.connect_failed(prior, &DaemonError::RemoteRejected("Invalid signature".into()));
        assert_eq!(c.status(), &NodeStatus::Offline);
    }

    #[test]
    fn test_restart_requires_reachable_status() {
        let mut c = Connectivity::default();
        let err = c.begin_restart(ServerId(1)).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(c.status(), &NodeStatus::Disconnected);
    }

    #[test]
    fn test_restart_failure_paths() {
        let mut c = connected("daemon_1_ab");
        let prior = c.begin_restart(ServerId(1)).unwrap();
        assert_eq!(c.status(), &NodeStatus::Restarting);
        c.restart_failed(prior, &DaemonError::RemoteRejected("busy".into()));
        assert_eq!(c.status(), &NodeStatus::Connected);

        let prior = c.begin_restart(ServerId(1)).unwrap();
        c.restart_failed(prior, &DaemonError::Transport("reset".into()));
        assert_eq!(c.status(), &NodeStatus::Offline);
        assert!(c.session().is_some());
    }

    #[test]
    fn test_poll_transitions() {
        let mut c = connected("daemon_1_ab");
        c.status_observed("online");
        assert_eq!(c.status(), &NodeStatus::Reported("online".into()));

        c.status_unreachable();
        assert_eq!(c.status(), &NodeStatus::Offline);
        assert!(c.session().is_some());

        c.status_observed("disconnected");
        assert_eq!(c.status(), &NodeStatus::Disconnected);
        assert!(c.session().is_none());
        assert!(c.check_poll().is_err());
    }

    #[test]
    fn test_disconnect_clears_session() {
        let mut c = connected("daemon_1_ab");
        c.disconnect_succeeded();
        assert_eq!(c, Connectivity::default());
    }

    #[test]
    fn test_restore_rejects_session_while_disconnected() {
        let err = Connectivity::restore(
            NodeStatus::Disconnected,
            Some(DaemonSessionId::new("daemon_1_ab")),
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::SessionWhileDisconnected);

        let json = r#"{"status":"disconnected","daemon_id":"daemon_1_ab"}"#;
        assert!(serde_json::from_str::<Connectivity>(json).is_err());
    }

    #[test]
    fn test_serde_shape() {
        let c = connected("daemon_7_ff");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["status"], "connected");
        assert_eq!(json["daemon_id"], "daemon_7_ff");
        let back: Connectivity = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }
}
