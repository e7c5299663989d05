//! Per-invocation state shared by the CLI commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::debug;

use xr_control::{
    AgentChannel, DaemonClient, FileStore, FleetReconciler, MemoryStore, OfflineChannel,
};
use xr_core::config::{self, ControlConfig};
use xr_core::Actor;

/// Origin recorded in audit entries written by the CLI
pub const CLI_ORIGIN: &str = "localhost";

/// Loaded configuration plus the entity store file it points at
pub struct Context {
    pub config: ControlConfig,
    pub config_path: PathBuf,
    store: FileStore,
    actor: Actor,
}

impl Context {
    /// Load the control configuration and open its entity store.
    ///
    /// A missing config file means defaults. `XERAY_DAEMON_SECRET` overrides
    /// the secret from the file.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config::default_config_path);

        let mut control = if config_path.exists() {
            config::load_config::<ControlConfig>(&config_path)
                .with_context(|| format!("Failed to load config from {:?}", config_path))?
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            ControlConfig::default()
        };
        if let Ok(secret) = std::env::var(config::SECRET_ENV) {
            if !secret.is_empty() {
                control.daemon.secret = secret;
            }
        }

        let store = FileStore::open(&control.store_path)
            .with_context(|| format!("Failed to open store {:?}", control.store_path))?;

        Ok(Self {
            config: control,
            config_path,
            store,
            actor: Actor::from_origin(CLI_ORIGIN),
        })
    }

    /// Entity records, for read-only commands
    pub fn store(&self) -> &MemoryStore {
        self.store.store()
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Build a reconciler that talks to agents.
    ///
    /// Fails if the configuration cannot reach agents (no secret, say).
    pub fn reconciler(&self) -> Result<FleetReconciler> {
        self.config
            .validate()
            .context("Configuration is not usable for agent commands")?;
        let client = DaemonClient::new(self.config.daemon.clone())?;
        Ok(FleetReconciler::new(self.store.shared(), Arc::new(client)))
    }

    /// Build a reconciler for inbound/outbound edits.
    ///
    /// Record edits only rewrite routing documents, so no secret is needed.
    /// Without one, any agent command is refused.
    pub fn editor(&self) -> Result<FleetReconciler> {
        let channel: Arc<dyn AgentChannel> = if self.config.daemon.secret.is_empty() {
            debug!("No daemon secret, record edits run offline");
            Arc::new(OfflineChannel)
        } else {
            Arc::new(DaemonClient::new(self.config.daemon.clone())?)
        };
        Ok(FleetReconciler::new(self.store.shared(), channel))
    }

    /// Write the entity store back to disk
    pub async fn save(&self) -> Result<()> {
        self.store
            .save()
            .await
            .with_context(|| format!("Failed to save store {:?}", self.store.path()))
    }
}
