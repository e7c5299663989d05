//! Fleet reconciler
//!
//! Every lifecycle operation on a node runs here, under that node's lock:
//! re-synthesize the routing document when records changed, issue the agent
//! command, then record the resulting connectivity. Agent failures never
//! leave a node in `connecting` or `restarting`; the recorded status is
//! always definite when an operation returns.
//!
//! Operations that reach the agent return a [`NodeOutcome`]. An `Err` means
//! the operation stopped before the agent was contacted (missing node,
//! synthesis failure, invalid transition) and nothing about the node's
//! connectivity changed.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use xr_core::error::{DaemonError, TransitionError};
use xr_core::traits::EntityStore;
use xr_core::{
    Actor, AuditEntry, EntityRef, Inbound, InboundDetails, InboundId, NodeStatus, Outbound,
    OutboundDetails, OutboundId, Server, ServerDetails, ServerId, XrError,
};
use xr_protocol::{ConnectParams, DaemonCommand, DaemonResponse};

use crate::client::AgentChannel;
use crate::locks::NodeLocks;
use crate::synth::{parse_settings, render_document, synthesize, RoutingDocument};

/// Recorded state of a node after an operation that reached its agent
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    /// The node as persisted when the operation finished
    pub server: Server,
    /// Agent failure, if the command did not succeed
    pub failure: Option<DaemonError>,
}

impl NodeOutcome {
    fn new(server: Server, failure: Option<DaemonError>) -> Self {
        Self { server, failure }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The node on success, the agent failure otherwise
    pub fn into_result(self) -> Result<Server, XrError> {
        match self.failure {
            None => Ok(self.server),
            Some(e) => Err(e.into()),
        }
    }
}

/// Orchestrates synthesis, agent commands and status bookkeeping for the fleet
pub struct FleetReconciler {
    store: Arc<dyn EntityStore>,
    channel: Arc<dyn AgentChannel>,
    locks: NodeLocks,
}

impl FleetReconciler {
    pub fn new(store: Arc<dyn EntityStore>, channel: Arc<dyn AgentChannel>) -> Self {
        Self {
            store,
            channel,
            locks: NodeLocks::new(),
        }
    }

    /// The entity store this reconciler writes to
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    async fn audit(
        &self,
        action: &str,
        details: String,
        server_id: Option<ServerId>,
        actor: &Actor,
    ) -> Result<(), XrError> {
        self.store
            .append_audit(AuditEntry::new(action, details, server_id, actor))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    /// Register a node, write its (initially empty) routing document and connect
    pub async fn add_node(
        &self,
        details: ServerDetails,
        actor: &Actor,
    ) -> Result<NodeOutcome, XrError> {
        let server = self.store.insert_server(details).await?;
        let _guard = self.locks.lock(server.id).await;

        if let Err(e) = synthesize(self.store.as_ref(), server.id, &server.config_path).await {
            error!(server_id = %server.id, error = %e, "Initial synthesis failed, removing node");
            self.store.delete_server(server.id).await?;
            self.locks.forget(server.id);
            return Err(e);
        }
        info!(server_id = %server.id, name = %server.name, "Server added");
        self.audit(
            "add_server",
            format!("Added server: {}", server.name),
            Some(server.id),
            actor,
        )
        .await?;
        self.audit(
            "create_xray_config",
            format!("Created routing configuration for server {}", server.id),
            Some(server.id),
            actor,
        )
        .await?;

        self.connect_locked(server).await
    }

    /// Replace a node's details, rewrite its routing document at the
    /// (possibly new) config path and reconnect
    pub async fn update_node(
        &self,
        id: ServerId,
        details: ServerDetails,
        actor: &Actor,
    ) -> Result<NodeOutcome, XrError> {
        let _guard = self.locks.lock(id).await;
        self.store.get_server(id).await?;

        // Write first so a failed write leaves the stored details untouched
        synthesize(self.store.as_ref(), id, &details.config_path).await?;
        let server = self.store.update_server(id, details).await?;
        self.store.set_config_stale(id, false).await?;
        info!(server_id = %id, name = %server.name, "Server updated");
        self.audit(
            "update_server",
            format!("Updated server: {}", server.name),
            Some(id),
            actor,
        )
        .await?;

        let server = self.store.get_server(id).await?;
        self.connect_locked(server).await
    }

    /// Issue `connect` and record the outcome. The caller holds the node lock.
    async fn connect_locked(&self, server: Server) -> Result<NodeOutcome, XrError> {
        let id = server.id;
        let mut connectivity = server.connectivity.clone();
        let prior = connectivity.status().clone();
        connectivity.begin_connect();
        let server = self.store.save_connectivity(id, &connectivity).await?;

        let command = DaemonCommand::Connect(ConnectParams {
            server_id: id.as_i64(),
            server_name: server.name.clone(),
            server_ip: server.ip_address.clone(),
            server_port: server.port,
            config_path: server.config_path.display().to_string(),
        });

        let failure = match self.channel.dispatch(&server, &command).await {
            Ok(reply) => match reply.daemon_id {
                Some(session) => {
                    info!(server_id = %id, daemon_id = %session, "Daemon session established");
                    connectivity.connect_succeeded(session);
                    None
                }
                None => {
                    error!(server_id = %id, "Agent accepted connect without issuing a daemon_id");
                    let e = DaemonError::Protocol("connect response carried no daemon_id".into());
                    connectivity.connect_failed(prior, &e);
                    Some(e)
                }
            },
            Err(e) => {
                warn!(server_id = %id, error = %e, "Connect failed");
                connectivity.connect_failed(prior, &e);
                Some(e)
            }
        };

        let server = self.store.save_connectivity(id, &connectivity).await?;
        Ok(NodeOutcome::new(server, failure))
    }

    /// Tell the agent to drop its session, then remove the node and its records.
    ///
    /// The node is removed whatever the agent answers.
    pub async fn delete_node(&self, id: ServerId, actor: &Actor) -> Result<NodeOutcome, XrError> {
        let _guard = self.locks.lock(id).await;
        let server = self.store.get_server(id).await?;

        let failure = match self.channel.dispatch(&server, &DaemonCommand::Disconnect).await {
            Ok(_) => None,
            Err(e) => {
                warn!(server_id = %id, error = %e, "Disconnect before delete failed, deleting anyway");
                Some(e)
            }
        };

        self.store.delete_server(id).await?;
        self.locks.forget(id);
        info!(server_id = %id, name = %server.name, "Server deleted");
        self.audit(
            "delete_server",
            format!("Deleted server: {}", server.name),
            Some(id),
            actor,
        )
        .await?;

        Ok(NodeOutcome::new(server, failure))
    }

    /// End the node's daemon session
    pub async fn disconnect_node(
        &self,
        id: ServerId,
        actor: &Actor,
    ) -> Result<NodeOutcome, XrError> {
        let _guard = self.locks.lock(id).await;
        let server = self.store.get_server(id).await?;
        let mut connectivity = server.connectivity.clone();
        if connectivity.status() == &NodeStatus::Disconnected {
            return Err(TransitionError::InvalidTransition {
                status: connectivity.status().clone(),
                operation: "disconnect",
            }
            .into());
        }

        let failure = match self.channel.dispatch(&server, &DaemonCommand::Disconnect).await {
            Ok(_) => {
                connectivity.disconnect_succeeded();
                None
            }
            Err(e) => {
                warn!(server_id = %id, error = %e, "Disconnect failed");
                connectivity.disconnect_failed(&e);
                Some(e)
            }
        };

        let server = self.store.save_connectivity(id, &connectivity).await?;
        info!(server_id = %id, status = %server.status(), "Disconnect finished");
        self.audit(
            "disconnect_server",
            outcome_detail(&format!("Disconnected server: {}", server.name), &failure),
            Some(id),
            actor,
        )
        .await?;
        Ok(NodeOutcome::new(server, failure))
    }

    /// Restart the proxy service on a connected or offline node
    pub async fn restart_node(&self, id: ServerId, actor: &Actor) -> Result<NodeOutcome, XrError> {
        let _guard = self.locks.lock(id).await;
        let server = self.store.get_server(id).await?;
        if server.config_stale {
            return Err(TransitionError::StaleConfig(id).into());
        }

        let mut connectivity = server.connectivity.clone();
        let prior = connectivity.begin_restart(id)?;
        let server = self.store.save_connectivity(id, &connectivity).await?;

        let failure = match self.channel.dispatch(&server, &DaemonCommand::RestartXray).await {
            Ok(_) => {
                connectivity.restart_succeeded();
                None
            }
            Err(e) => {
                warn!(server_id = %id, error = %e, "Restart failed");
                connectivity.restart_failed(prior, &e);
                Some(e)
            }
        };

        let server = self.store.save_connectivity(id, &connectivity).await?;
        info!(server_id = %id, status = %server.status(), "Restart finished");
        self.audit(
            "restart_xray",
            outcome_detail(&format!("Restarted xray on server: {}", server.name), &failure),
            Some(id),
            actor,
        )
        .await?;
        Ok(NodeOutcome::new(server, failure))
    }

    /// Ask the agent for the node's status and record the answer.
    ///
    /// Polling also settles nodes left `connecting` or `restarting` by an
    /// interrupted operation.
    pub async fn poll_status(&self, id: ServerId, actor: &Actor) -> Result<NodeOutcome, XrError> {
        let _guard = self.locks.lock(id).await;
        let server = self.store.get_server(id).await?;
        let mut connectivity = server.connectivity.clone();
        connectivity.check_poll()?;

        let failure = if connectivity.session().is_none() {
            debug!(server_id = %id, "Polled node has no session, marking disconnected");
            connectivity.abandon_connect();
            Some(DaemonError::NotConnected(id))
        } else {
            match self.channel.dispatch(&server, &DaemonCommand::CheckStatus).await {
                Ok(DaemonResponse {
                    status: Some(status),
                    ..
                }) => {
                    connectivity.status_observed(&status);
                    None
                }
                Ok(_) => {
                    error!(server_id = %id, "Agent answered check_status without a status");
                    connectivity.status_unreachable();
                    Some(DaemonError::Protocol(
                        "check_status response carried no status".into(),
                    ))
                }
                Err(e) => {
                    if e.is_unreachable() {
                        connectivity.status_unreachable();
                    } else {
                        connectivity.poll_rejected();
                    }
                    warn!(server_id = %id, error = %e, "Status poll failed");
                    Some(e)
                }
            }
        };

        let server = self.store.save_connectivity(id, &connectivity).await?;
        debug!(server_id = %id, status = %server.status(), "Status recorded");
        self.audit(
            "update_server_status",
            outcome_detail(
                &format!("Server {} status: {}", server.name, server.status()),
                &failure,
            ),
            Some(id),
            actor,
        )
        .await?;
        Ok(NodeOutcome::new(server, failure))
    }

    /// Poll every node that is not disconnected, concurrently
    pub async fn poll_all(
        &self,
        actor: &Actor,
    ) -> Result<Vec<(ServerId, Result<NodeOutcome, XrError>)>, XrError> {
        let ids: Vec<ServerId> = self
            .store
            .list_servers()
            .await?
            .into_iter()
            .filter(|s| s.status().permits_poll())
            .map(|s| s.id)
            .collect();

        let polls = ids.iter().map(|&id| async move { (id, self.poll_status(id, actor).await) });
        Ok(join_all(polls).await)
    }

    /// Send a non-lifecycle command (for example `get_stats`) to a node's agent
    pub async fn run_command(
        &self,
        id: ServerId,
        name: &str,
        params: Map<String, Value>,
        actor: &Actor,
    ) -> Result<DaemonResponse, XrError> {
        if matches!(
            name,
            DaemonCommand::CONNECT
                | DaemonCommand::DISCONNECT
                | DaemonCommand::CHECK_STATUS
                | DaemonCommand::RESTART_XRAY
        ) {
            return Err(TransitionError::ReservedCommand(name.to_string()).into());
        }

        let _guard = self.locks.lock(id).await;
        let server = self.store.get_server(id).await?;
        let result = self
            .channel
            .dispatch(&server, &DaemonCommand::named(name, params))
            .await;

        let failure = result.as_ref().err().cloned();
        self.audit(
            "daemon_command",
            outcome_detail(&format!("Ran {} on server: {}", name, server.name), &failure),
            Some(id),
            actor,
        )
        .await?;
        Ok(result?)
    }

    /// Build a node's routing document without writing it
    pub async fn render_config(&self, id: ServerId) -> Result<RoutingDocument, XrError> {
        self.store.get_server(id).await?;
        render_document(self.store.as_ref(), id).await
    }

    /// Rewrite a node's routing document, tracking whether it is stale.
    /// The caller holds the node lock.
    async fn resynthesize_locked(&self, id: ServerId) -> Result<(), XrError> {
        let server = self.store.get_server(id).await?;
        match synthesize(self.store.as_ref(), id, &server.config_path).await {
            Ok(_) => {
                if server.config_stale {
                    info!(server_id = %id, "Routing configuration is current again");
                    self.store.set_config_stale(id, false).await?;
                }
                Ok(())
            }
            Err(e) => {
                error!(server_id = %id, error = %e, "Re-synthesis failed, configuration is stale");
                self.store.set_config_stale(id, true).await?;
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound records
    // ------------------------------------------------------------------

    /// Create an inbound on a node and rewrite the node's document
    pub async fn add_inbound(
        &self,
        server_id: ServerId,
        details: InboundDetails,
        actor: &Actor,
    ) -> Result<Inbound, XrError> {
        parse_settings(EntityRef::Server(server_id), &details.settings)?;

        let _guard = self.locks.lock(server_id).await;
        let inbound = self.store.insert_inbound(server_id, details).await?;
        info!(server_id = %server_id, inbound_id = %inbound.id, port = inbound.port, "Inbound added");
        self.audit(
            "add_inbound",
            format!("Added inbound {} on port {}", inbound.name, inbound.port),
            Some(server_id),
            actor,
        )
        .await?;
        self.resynthesize_locked(server_id).await?;
        Ok(inbound)
    }

    /// Replace an inbound and rewrite its node's document
    pub async fn update_inbound(
        &self,
        id: InboundId,
        details: InboundDetails,
        actor: &Actor,
    ) -> Result<Inbound, XrError> {
        parse_settings(EntityRef::Inbound(id), &details.settings)?;
        let server_id = self.store.get_inbound(id).await?.server_id;

        let _guard = self.locks.lock(server_id).await;
        let inbound = self.store.update_inbound(id, details).await?;
        info!(server_id = %server_id, inbound_id = %id, enabled = inbound.enabled, "Inbound updated");
        self.audit(
            "update_inbound",
            format!("Updated inbound {}", inbound.name),
            Some(server_id),
            actor,
        )
        .await?;
        self.resynthesize_locked(server_id).await?;
        Ok(inbound)
    }

    /// Enable or disable an inbound
    pub async fn set_inbound_enabled(
        &self,
        id: InboundId,
        enabled: bool,
        actor: &Actor,
    ) -> Result<Inbound, XrError> {
        let mut details = self.store.get_inbound(id).await?.details();
        details.enabled = enabled;
        self.update_inbound(id, details, actor).await
    }

    /// Remove an inbound and rewrite its node's document
    pub async fn delete_inbound(&self, id: InboundId, actor: &Actor) -> Result<Inbound, XrError> {
        let server_id = self.store.get_inbound(id).await?.server_id;

        let _guard = self.locks.lock(server_id).await;
        let inbound = self.store.delete_inbound(id).await?;
        info!(server_id = %server_id, inbound_id = %id, "Inbound deleted");
        self.audit(
            "delete_inbound",
            format!("Deleted inbound {}", inbound.name),
            Some(server_id),
            actor,
        )
        .await?;
        self.resynthesize_locked(server_id).await?;
        Ok(inbound)
    }

    // ------------------------------------------------------------------
    // Outbound records
    // ------------------------------------------------------------------

    /// Create an outbound on a node and rewrite the node's document
    pub async fn add_outbound(
        &self,
        server_id: ServerId,
        details: OutboundDetails,
        actor: &Actor,
    ) -> Result<Outbound, XrError> {
        parse_settings(EntityRef::Server(server_id), &details.settings)?;

        let _guard = self.locks.lock(server_id).await;
        let outbound = self.store.insert_outbound(server_id, details).await?;
        info!(server_id = %server_id, outbound_id = %outbound.id, "Outbound added");
        self.audit(
            "add_outbound",
            format!("Added outbound {}", outbound.name),
            Some(server_id),
            actor,
        )
        .await?;
        self.resynthesize_locked(server_id).await?;
        Ok(outbound)
    }

    /// Replace an outbound and rewrite its node's document
    pub async fn update_outbound(
        &self,
        id: OutboundId,
        details: OutboundDetails,
        actor: &Actor,
    ) -> Result<Outbound, XrError> {
        parse_settings(EntityRef::Outbound(id), &details.settings)?;
        let server_id = self.store.get_outbound(id).await?.server_id;

        let _guard = self.locks.lock(server_id).await;
        let outbound = self.store.update_outbound(id, details).await?;
        info!(server_id = %server_id, outbound_id = %id, enabled = outbound.enabled, "Outbound updated");
        self.audit(
            "update_outbound",
            format!("Updated outbound {}", outbound.name),
            Some(server_id),
            actor,
        )
        .await?;
        self.resynthesize_locked(server_id).await?;
        Ok(outbound)
    }

    /// Enable or disable an outbound
    pub async fn set_outbound_enabled(
        &self,
        id: OutboundId,
        enabled: bool,
        actor: &Actor,
    ) -> Result<Outbound, XrError> {
        let mut details = self.store.get_outbound(id).await?.details();
        details.enabled = enabled;
        self.update_outbound(id, details, actor).await
    }

    /// Remove an outbound and rewrite its node's document
    pub async fn delete_outbound(&self, id: OutboundId, actor: &Actor) -> Result<Outbound, XrError> {
        let server_id = self.store.get_outbound(id).await?.server_id;

        let _guard = self.locks.lock(server_id).await;
        let outbound = self.store.delete_outbound(id).await?;
        info!(server_id = %server_id, outbound_id = %id, "Outbound deleted");
        self.audit(
            "delete_outbound",
            format!("Deleted outbound {}", outbound.name),
            Some(server_id),
            actor,
        )
        .await?;
        self.resynthesize_locked(server_id).await?;
        Ok(outbound)
    }
}

fn outcome_detail(action: &str, failure: &Option<DaemonError>) -> String {
    match failure {
        None => action.to_string(),
        Some(e) => format!("{} (failed: {})", action, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use xr_core::error::{StoreError, SynthesisError};
    use xr_core::DaemonSessionId;

    use crate::store::MemoryStore;

    /// Channel that answers from a script and records what it was sent
    #[derive(Default)]
    struct ScriptedChannel {
        replies: Mutex<VecDeque<Result<DaemonResponse, DaemonError>>>,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedChannel {
        fn push(&self, reply: Result<DaemonResponse, DaemonError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentChannel for ScriptedChannel {
        async fn dispatch(
            &self,
            node: &Server,
            command: &DaemonCommand,
        ) -> Result<DaemonResponse, DaemonError> {
            self.sent.lock().unwrap().push(command.name().to_string());
            if command.requires_session() && node.session().is_none() {
                return Err(DaemonError::NotConnected(node.id));
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DaemonError::Transport("no scripted reply".into())))
        }
    }

    fn connected(id: &str) -> Result<DaemonResponse, DaemonError> {
        Ok(DaemonResponse::ok().with_daemon_id(DaemonSessionId::new(id)))
    }

    fn details(dir: &Path) -> ServerDetails {
        ServerDetails {
            name: "edge-1".to_string(),
            location: "Helsinki".to_string(),
            ip_address: "127.0.0.1".to_string(),
            port: 443,
            protocol: "tcp".to_string(),
            config_path: dir.join("config.json"),
        }
    }

    fn setup() -> (FleetReconciler, Arc<ScriptedChannel>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(ScriptedChannel::default());
        let reconciler = FleetReconciler::new(store.clone(), channel.clone());
        (reconciler, channel, store)
    }

    fn actor() -> Actor {
        Actor::from_origin("127.0.0.1")
    }

    #[tokio::test]
    async fn test_add_node_connects() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, store) = setup();
        channel.push(connected("d1"));

        let outcome = reconciler.add_node(details(dir.path()), &actor()).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.server.status(), &NodeStatus::Connected);
        assert_eq!(outcome.server.session(), Some(&DaemonSessionId::new("d1")));
        assert!(dir.path().join("config.json").exists());

        let actions: Vec<String> = store
            .list_audit(Some(outcome.server.id))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["add_server", "create_xray_config"]);
    }

    #[tokio::test]
    async fn test_add_node_unreachable_is_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(Err(DaemonError::Transport("refused".into())));

        let outcome = reconciler.add_node(details(dir.path()), &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Disconnected);
        assert!(outcome.server.session().is_none());
        assert!(outcome.into_result().unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_connect_without_daemon_id_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(Ok(DaemonResponse::ok()));

        let outcome = reconciler.add_node(details(dir.path()), &actor()).await.unwrap();
        assert!(matches!(outcome.failure, Some(DaemonError::Protocol(_))));
        assert_eq!(outcome.server.status(), &NodeStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_add_node_write_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let (reconciler, channel, store) = setup();

        let err = reconciler.add_node(details(&blocker), &actor()).await.unwrap_err();
        assert!(matches!(
            err,
            XrError::Synthesis(SynthesisError::ConfigWriteFailed { .. })
        ));
        assert!(store.list_servers().await.unwrap().is_empty());
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_restart_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(connected("d1"));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        channel.push(Err(DaemonError::RemoteRejected("busy".into())));
        let outcome = reconciler.restart_node(id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Connected);
        assert_eq!(
            outcome.failure,
            Some(DaemonError::RemoteRejected("busy".into()))
        );

        channel.push(Err(DaemonError::Transport("reset".into())));
        let outcome = reconciler.restart_node(id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Offline);
        assert_eq!(outcome.server.session(), Some(&DaemonSessionId::new("d1")));

        channel.push(Ok(DaemonResponse::ok()));
        let outcome = reconciler.restart_node(id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Connected);
    }

    #[tokio::test]
    async fn test_restart_refused_while_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(Err(DaemonError::Transport("refused".into())));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        let err = reconciler.restart_node(id, &actor()).await.unwrap_err();
        assert!(matches!(
            err,
            XrError::Transition(TransitionError::InvalidTransition { .. })
        ));
        assert_eq!(channel.sent(), vec!["connect"]);
    }

    #[tokio::test]
    async fn test_poll_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(connected("d1"));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        channel.push(Ok(DaemonResponse::ok().with_status("online")));
        let outcome = reconciler.poll_status(id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status().as_str(), "online");

        channel.push(Ok(DaemonResponse::ok()));
        let outcome = reconciler.poll_status(id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Offline);
        assert!(matches!(outcome.failure, Some(DaemonError::Protocol(_))));
        assert_eq!(outcome.server.session(), Some(&DaemonSessionId::new("d1")));

        channel.push(Err(DaemonError::RemoteRejected("Invalid daemon ID".into())));
        let outcome = reconciler.poll_status(id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Offline);
    }

    #[tokio::test]
    async fn test_poll_disconnected_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(Err(DaemonError::Transport("refused".into())));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        let err = reconciler.poll_status(id, &actor()).await.unwrap_err();
        assert!(matches!(err, XrError::Transition(_)));
    }

    #[tokio::test]
    async fn test_poll_settles_interrupted_connect() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, _channel, store) = setup();
        let server = store.insert_server(details(dir.path())).await.unwrap();
        let mut connectivity = server.connectivity.clone();
        connectivity.begin_connect();
        store.save_connectivity(server.id, &connectivity).await.unwrap();

        let outcome = reconciler.poll_status(server.id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_clears_session() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(connected("d1"));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        channel.push(Ok(DaemonResponse::ok()));
        let outcome = reconciler.disconnect_node(id, &actor()).await.unwrap();
        assert_eq!(outcome.server.status(), &NodeStatus::Disconnected);
        assert!(outcome.server.session().is_none());

        let err = reconciler.disconnect_node(id, &actor()).await.unwrap_err();
        assert!(matches!(err, XrError::Transition(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_node_even_if_disconnect_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, store) = setup();
        channel.push(connected("d1"));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;
        reconciler
            .add_outbound(
                id,
                OutboundDetails {
                    name: "direct".to_string(),
                    protocol: "freedom".to_string(),
                    settings: "{}".to_string(),
                    enabled: true,
                },
                &actor(),
            )
            .await
            .unwrap();

        channel.push(Err(DaemonError::Transport("timeout".into())));
        let outcome = reconciler.delete_node(id, &actor()).await.unwrap();
        assert!(outcome.failure.is_some());
        assert_eq!(channel.sent(), vec!["connect", "disconnect"]);
        assert!(matches!(
            store.get_server(id).await,
            Err(StoreError::NotFound(_))
        ));
        let last = store.list_audit(Some(id)).await.unwrap().pop().unwrap();
        assert_eq!(last.action, "delete_server");
    }

    #[tokio::test]
    async fn test_failed_resynthesis_marks_stale_and_blocks_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, store) = setup();
        channel.push(connected("d1"));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        // Make the config path unwritable by turning its directory into a file
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "").unwrap();
        store.update_server(id, details(&blocked)).await.unwrap();

        let err = reconciler
            .add_inbound(
                id,
                InboundDetails {
                    name: "a".to_string(),
                    protocol: "vless".to_string(),
                    port: 443,
                    settings: "{}".to_string(),
                    enabled: true,
                },
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, XrError::Synthesis(_)));
        assert!(store.get_server(id).await.unwrap().config_stale);

        let err = reconciler.restart_node(id, &actor()).await.unwrap_err();
        assert!(matches!(
            err,
            XrError::Transition(TransitionError::StaleConfig(_))
        ));

        // Fix the path; the next successful synthesis clears the flag
        channel.push(connected("d2"));
        reconciler
            .update_node(id, details(dir.path()), &actor())
            .await
            .unwrap();
        assert!(!store.get_server(id).await.unwrap().config_stale);
    }

    #[tokio::test]
    async fn test_malformed_settings_rejected_before_store() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, store) = setup();
        channel.push(connected("d1"));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        let err = reconciler
            .add_inbound(
                id,
                InboundDetails {
                    name: "bad".to_string(),
                    protocol: "vless".to_string(),
                    port: 443,
                    settings: "{not json".to_string(),
                    enabled: true,
                },
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            XrError::Synthesis(SynthesisError::MalformedSettings { .. })
        ));
        assert!(store.list_inbounds(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_command_rejects_lifecycle_names() {
        let (reconciler, channel, _store) = setup();
        let err = reconciler
            .run_command(ServerId(1), "restart_xray", Map::new(), &actor())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            XrError::Transition(TransitionError::ReservedCommand(_))
        ));
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_command_returns_agent_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, channel, _store) = setup();
        channel.push(connected("d1"));
        let id = reconciler.add_node(details(dir.path()), &actor()).await.unwrap().server.id;

        channel.push(Ok(
            DaemonResponse::ok().with_field("uptime", Value::from(42))
        ));
        let reply = reconciler
            .run_command(id, "get_stats", Map::new(), &actor())
            .await
            .unwrap();
        assert_eq!(reply.extra["uptime"], Value::from(42));
    }

    #[tokio::test]
    async fn test_not_found_is_surfaced() {
        let (reconciler, channel, _store) = setup();
        let err = reconciler.restart_node(ServerId(99), &actor()).await.unwrap_err();
        assert!(err.is_not_found());
        let err = reconciler.render_config(ServerId(99)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(channel.sent().is_empty());
    }
}
