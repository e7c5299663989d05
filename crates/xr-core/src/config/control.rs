//! Control plane configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;

/// Configuration for the fleet control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Entity store file
    pub store_path: PathBuf,

    /// How to reach node agents
    pub daemon: DaemonConfig,

    /// Caller-side retry policy for retryable failures
    pub backoff: BackoffConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            store_path: super::default_store_path(),
            daemon: DaemonConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Check the configuration is usable for talking to agents
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.secret.is_empty() {
            return Err(ConfigError::MissingField("daemon.secret".to_string()));
        }
        if !matches!(self.daemon.scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "daemon.scheme must be http or https, got {:?}",
                self.daemon.scheme
            )));
        }
        if self.daemon.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "daemon.timeout must be at least one second".to_string(),
            ));
        }
        self.backoff.validate()
    }
}

/// Agent addressing and authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Pre-shared secret for the header and request signatures
    pub secret: String,

    /// Fixed agent base URL; when unset each node is addressed at its own IP
    pub endpoint: Option<String>,

    /// URL scheme for per-node addressing
    pub scheme: String,

    /// Port the agent listens on for per-node addressing
    pub agent_port: u16,

    /// Per-request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            endpoint: None,
            scheme: "http".to_string(),
            agent_port: xr_protocol::DEFAULT_AGENT_PORT,
            timeout: Duration::from_secs(10),
        }
    }
}

impl DaemonConfig {
    /// Base URL of the agent serving the node at `ip_address`
    pub fn agent_url(&self, ip_address: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("{}://{}:{}", self.scheme, ip_address, self.agent_port),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Total attempts including the first; 1 disables retry
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// Reject factors that would make delays shrink, go negative or overflow
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        if self.initial > self.max {
            return Err(ConfigError::Invalid(
                "backoff.initial must not exceed backoff.max".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: 3,
        }
    }
}
