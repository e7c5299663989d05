//! Daemon session identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle issued by an agent on a successful `connect`.
///
/// Holding one proves an active control binding between the control plane
/// and the agent of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaemonSessionId(String);

impl DaemonSessionId {
    /// Wrap a session id issued by an agent
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DaemonSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DaemonSessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DaemonSessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
