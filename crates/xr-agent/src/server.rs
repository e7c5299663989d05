//! HTTP surface of the agent
//!
//! Every POST endpoint takes a [`CommandEnvelope`] body. Requests with a
//! wrong `X-Daemon-Secret` header or a bad signature get `401`; everything
//! the agent understood but refused gets `200` with `success: false`.
//!
//! `GET /servers` and `GET /server/:server_id` list bindings and need the
//! secret header but no envelope. `GET /health` is open.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use xr_protocol::{
    validate_secret, CommandEnvelope, DaemonCommand, DaemonResponse, Endpoint, SECRET_HEADER,
};

use crate::state::{AgentState, SessionCheck};

/// Build the agent router
pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/command", post(command))
        .route("/health", get(health))
        .route("/servers", get(list_servers))
        .route("/server/:server_id", get(server_info))
        .with_state(state)
}

/// Push a full proxy config and restart; params `{"config": {...}}`
pub const UPDATE_CONFIG: &str = "update_config";
/// Report uptime and the caller's binding
pub const GET_STATS: &str = "get_stats";

async fn health(State(state): State<Arc<AgentState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "servers": state.binding_count(),
        "uptime": state.uptime_secs(),
    }))
}

async fn connect(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, Endpoint::Connect, &headers, &body).await
}

async fn disconnect(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, Endpoint::Disconnect, &headers, &body).await
}

async fn command(
    State(state): State<Arc<AgentState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, Endpoint::Command, &headers, &body).await
}

async fn list_servers(State(state): State<Arc<AgentState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers, "/servers") {
        return denied;
    }
    let servers: Vec<Value> = state
        .bindings()
        .into_iter()
        .map(|(server_id, binding)| json!({ "server_id": server_id, "binding": binding }))
        .collect();
    reply(
        StatusCode::OK,
        DaemonResponse::ok().with_field("servers", Value::from(servers)),
    )
}

async fn server_info(
    State(state): State<Arc<AgentState>>,
    Path(server_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&state, &headers, "/server") {
        return denied;
    }
    match state.binding(server_id) {
        Some(binding) => reply(
            StatusCode::OK,
            DaemonResponse::ok().with_field("binding", json!(binding)),
        ),
        None => reply(
            StatusCode::NOT_FOUND,
            DaemonResponse::rejected(SessionCheck::UnknownServer.message()),
        ),
    }
}

fn reply(status: StatusCode, response: DaemonResponse) -> Response {
    (status, Json(response)).into_response()
}

/// Check the secret header; the error is the `401` to send back
fn authorize(state: &AgentState, headers: &HeaderMap, path: &str) -> Result<(), Response> {
    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if validate_secret(presented, &state.config.secret) {
        Ok(())
    } else {
        warn!(path, "Rejected request with invalid secret");
        Err(reply(
            StatusCode::UNAUTHORIZED,
            DaemonResponse::rejected("Invalid secret key"),
        ))
    }
}

/// Authenticate, decode and execute one request
async fn handle(state: &AgentState, endpoint: Endpoint, headers: &HeaderMap, body: &[u8]) -> Response {
    if let Err(denied) = authorize(state, headers, endpoint.path()) {
        return denied;
    }

    let envelope: CommandEnvelope = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(e) => {
            return reply(
                StatusCode::BAD_REQUEST,
                DaemonResponse::rejected(format!("Malformed request: {}", e)),
            )
        }
    };

    if !envelope.verify(&state.signer) {
        warn!(server_id = envelope.server_id, "Rejected request with invalid signature");
        return reply(StatusCode::UNAUTHORIZED, DaemonResponse::rejected("Invalid signature"));
    }

    let response = match envelope.open(endpoint) {
        Ok(cmd) => execute(state, &envelope, cmd).await,
        Err(e) => DaemonResponse::rejected(e.to_string()),
    };
    reply(StatusCode::OK, response)
}

async fn execute(state: &AgentState, envelope: &CommandEnvelope, cmd: DaemonCommand) -> DaemonResponse {
    let server_id = envelope.server_id;
    debug!(server_id, command = cmd.name(), "Executing command");

    if let DaemonCommand::Connect(params) = cmd {
        if params.server_id != server_id {
            return DaemonResponse::rejected("server_id mismatch between envelope and params");
        }
        let name = params.server_name.clone();
        let daemon_id = state.bind(params);
        info!(server_id, server = %name, daemon_id = %daemon_id, "Server connected");
        return DaemonResponse::ok().with_daemon_id(daemon_id);
    }

    if let DaemonCommand::Disconnect = cmd {
        return match state.unbind(server_id, envelope.daemon_id.as_ref()) {
            Ok(binding) => {
                info!(server_id, server = %binding.server_name, "Server disconnected");
                DaemonResponse::ok()
            }
            Err(check) => DaemonResponse::rejected(check.message()),
        };
    }

    if let Err(check) = state.verify_session(server_id, envelope.daemon_id.as_ref()) {
        return DaemonResponse::rejected(check.message());
    }

    match cmd {
        DaemonCommand::CheckStatus => {
            let status = state.proxy.probe().await;
            let heartbeat = state.heartbeat(server_id, status);
            DaemonResponse::ok()
                .with_status(status)
                .with_field("last_heartbeat", Value::from(heartbeat))
        }
        DaemonCommand::RestartXray => match state.proxy.restart().await {
            Ok(()) => {
                state.heartbeat(server_id, "restarting");
                info!(server_id, "Proxy restarted");
                DaemonResponse::ok()
            }
            Err(reason) => DaemonResponse::rejected(reason),
        },
        DaemonCommand::Named { name, params } if name == UPDATE_CONFIG => {
            let Some(document) = params.get("config").filter(|v| v.is_object()) else {
                return DaemonResponse::rejected("Missing config object");
            };
            let Some(binding) = state.binding(server_id) else {
                return DaemonResponse::rejected(SessionCheck::UnknownServer.message());
            };
            let path = std::path::Path::new(&binding.config_path);
            match state.proxy.apply_config(path, document).await {
                Ok(()) => {
                    state.heartbeat(server_id, "restarting");
                    info!(server_id, server = %binding.server_name, "Proxy config updated");
                    DaemonResponse::ok()
                }
                Err(reason) => DaemonResponse::rejected(reason),
            }
        }
        DaemonCommand::Named { name, .. } if name == GET_STATS => {
            let binding = state.binding(server_id);
            DaemonResponse::ok().with_field(
                "stats",
                json!({
                    "uptime": state.uptime_secs(),
                    "servers": state.binding_count(),
                    "binding": binding,
                }),
            )
        }
        other => DaemonResponse::rejected(format!("Unknown command: {}", other.name())),
    }
}
