//! Heartbeat monitor
//!
//! A binding is refreshed by every `connect` and `check_status`. When the
//! control plane stops polling a server for longer than the heartbeat
//! timeout, the monitor marks that binding offline.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use xr_core::time::current_time_secs;

use crate::state::AgentState;

/// Run the heartbeat monitor until `cancel` fires
pub async fn run_heartbeat_monitor(state: Arc<AgentState>, cancel: CancellationToken) {
    let timeout = state.config.heartbeat_timeout;
    let period = state.config.monitor_interval.max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);

    info!(?timeout, ?period, "Starting heartbeat monitor");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                mark_silent_offline(&state, timeout);
            }
            _ = cancel.cancelled() => {
                info!("Heartbeat monitor shutting down");
                break;
            }
        }
    }
}

fn mark_silent_offline(state: &AgentState, timeout: Duration) {
    for server_id in state.expire_silent(timeout, current_time_secs()) {
        let name = state
            .binding(server_id)
            .map(|b| b.server_name)
            .unwrap_or_default();
        warn!(server_id, server = %name, "No heartbeat, marking server offline");
    }
}
