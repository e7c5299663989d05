//! Agent state management

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use xr_core::config::AgentConfig;
use xr_core::time::current_time_secs;
use xr_protocol::{ConnectParams, DaemonSessionId, Signer};

use crate::store;
use crate::xray::ProxyControl;

/// Control binding created by a successful `connect`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub daemon_id: DaemonSessionId,
    pub server_name: String,
    pub server_ip: String,
    pub server_port: u16,
    pub config_path: String,
    /// Last observed proxy status
    pub status: String,
    /// Unix time of the last connect or status check
    pub last_heartbeat: u64,
}

/// Why a session-bound command was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    UnknownServer,
    WrongSession,
}

impl SessionCheck {
    pub fn message(&self) -> &'static str {
        match self {
            SessionCheck::UnknownServer => "Server not found",
            SessionCheck::WrongSession => "Invalid daemon ID",
        }
    }
}

/// Global state for the agent daemon
pub struct AgentState {
    pub config: AgentConfig,
    pub signer: Signer,
    pub proxy: ProxyControl,
    bindings: DashMap<i64, Binding>,
    /// Serializes snapshot-and-write so the file never goes backwards
    persist_lock: Mutex<()>,
    started_at: Instant,
}

impl AgentState {
    pub fn new(config: AgentConfig) -> Self {
        let signer = Signer::new(&config.secret);
        let proxy = ProxyControl::new(config.status_command.clone(), config.restart_command.clone());
        Self {
            config,
            signer,
            proxy,
            bindings: DashMap::new(),
            persist_lock: Mutex::new(()),
            started_at: Instant::now(),
        }
    }

    /// Create the state and restore bindings saved at `config.state_path`
    pub fn open(config: AgentConfig) -> anyhow::Result<Self> {
        let state = Self::new(config);
        if let Some(path) = &state.config.state_path {
            let saved = store::load_bindings(path)?;
            debug!(path = %path.display(), bindings = saved.len(), "Restored bindings");
            for (server_id, binding) in saved {
                state.bindings.insert(server_id, binding);
            }
        }
        Ok(state)
    }

    /// Write the current bindings to the state file, if one is configured.
    ///
    /// A failed write is logged; the in-memory binding stays authoritative.
    fn persist(&self) {
        let Some(path) = &self.config.state_path else {
            return;
        };
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = store::save_bindings(path, &self.snapshot()) {
            warn!(error = %e, "Failed to persist bindings");
        }
    }

    fn snapshot(&self) -> BTreeMap<i64, Binding> {
        self.bindings
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Bind `params.server_id` to a fresh session, replacing any earlier one
    pub fn bind(&self, params: ConnectParams) -> DaemonSessionId {
        let suffix: [u8; 8] = rand::random();
        let daemon_id =
            DaemonSessionId::new(format!("daemon_{}_{}", params.server_id, hex::encode(suffix)));

        self.bindings.insert(
            params.server_id,
            Binding {
                daemon_id: daemon_id.clone(),
                server_name: params.server_name,
                server_ip: params.server_ip,
                server_port: params.server_port,
                config_path: params.config_path,
                status: "connected".to_string(),
                last_heartbeat: current_time_secs(),
            },
        );
        self.persist();
        daemon_id
    }

    /// Check that `daemon_id` is the current session of `server_id`
    pub fn verify_session(
        &self,
        server_id: i64,
        daemon_id: Option<&DaemonSessionId>,
    ) -> Result<(), SessionCheck> {
        let binding = self
            .bindings
            .get(&server_id)
            .ok_or(SessionCheck::UnknownServer)?;
        match daemon_id {
            Some(id) if *id == binding.daemon_id => Ok(()),
            _ => Err(SessionCheck::WrongSession),
        }
    }

    /// Drop the binding of `server_id`. A supplied session must match.
    ///
    /// The session check and the removal happen under one map entry lock, so
    /// a concurrent `connect` is never undone by a stale disconnect.
    pub fn unbind(
        &self,
        server_id: i64,
        daemon_id: Option<&DaemonSessionId>,
    ) -> Result<Binding, SessionCheck> {
        let removed = self.bindings.remove_if(&server_id, |_, binding| {
            daemon_id.map_or(true, |id| *id == binding.daemon_id)
        });
        match removed {
            Some((_, binding)) => {
                self.persist();
                Ok(binding)
            }
            None if self.bindings.contains_key(&server_id) => Err(SessionCheck::WrongSession),
            None => Err(SessionCheck::UnknownServer),
        }
    }

    /// Record an observed status and refresh the heartbeat
    pub fn heartbeat(&self, server_id: i64, status: &str) -> u64 {
        let now = current_time_secs();
        let found = match self.bindings.get_mut(&server_id) {
            Some(mut binding) => {
                binding.status = status.to_string();
                binding.last_heartbeat = now;
                true
            }
            None => false,
        };
        if found {
            self.persist();
        }
        now
    }

    /// Mark bindings whose last heartbeat is older than `timeout` as offline.
    ///
    /// Returns the server ids that changed; bindings already offline are
    /// left alone.
    pub fn expire_silent(&self, timeout: Duration, now: u64) -> Vec<i64> {
        let mut expired = Vec::new();
        for mut entry in self.bindings.iter_mut() {
            let silent_for = now.saturating_sub(entry.last_heartbeat);
            if silent_for > timeout.as_secs() && entry.status != "offline" {
                entry.status = "offline".to_string();
                expired.push(*entry.key());
            }
        }
        if !expired.is_empty() {
            self.persist();
        }
        expired
    }

    /// All bindings, ordered by server id
    pub fn bindings(&self) -> Vec<(i64, Binding)> {
        self.snapshot().into_iter().collect()
    }

    pub fn binding(&self, server_id: i64) -> Option<Binding> {
        self.bindings.get(&server_id).map(|b| b.clone())
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
