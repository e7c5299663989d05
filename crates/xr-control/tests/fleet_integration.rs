//! Fleet control integration tests
//!
//! Runs the reconciler over real HTTP, against either the reference agent
//! or a scripted stand-in, with configuration documents on a temp dir.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use xr_control::{DaemonClient, FleetReconciler, MemoryStore};
use xr_core::config::{AgentConfig, DaemonConfig};
use xr_core::error::{DaemonError, StoreError};
use xr_core::traits::EntityStore;
use xr_core::{
    Actor, DaemonSessionId, InboundDetails, NodeStatus, OutboundDetails, ServerDetails, XrError,
};
use xr_protocol::{CommandEnvelope, DaemonResponse};

const SECRET: &str = "fleet-secret";

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Reference agent on an ephemeral port
async fn real_agent() -> String {
    let state = Arc::new(xr_agent::AgentState::new(AgentConfig {
        secret: SECRET.to_string(),
        ..AgentConfig::default()
    }));
    serve(xr_agent::router(state)).await
}

/// How the scripted agent answers
#[derive(Clone, Copy)]
enum StatusBehavior {
    Online,
    Hang,
}

#[derive(Clone)]
struct Script {
    calls: Arc<Mutex<Vec<String>>>,
    status: StatusBehavior,
    fail_disconnect: bool,
}

async fn scripted_connect(State(script): State<Script>) -> Json<DaemonResponse> {
    script.calls.lock().unwrap().push("connect".to_string());
    Json(DaemonResponse::ok().with_daemon_id(DaemonSessionId::new("d1")))
}

async fn scripted_disconnect(State(script): State<Script>) -> Response {
    script.calls.lock().unwrap().push("disconnect".to_string());
    if script.fail_disconnect {
        (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
    } else {
        Json(DaemonResponse::ok()).into_response()
    }
}

async fn scripted_command(
    State(script): State<Script>,
    Json(envelope): Json<CommandEnvelope>,
) -> Json<DaemonResponse> {
    let name = envelope.command.unwrap_or_default();
    script.calls.lock().unwrap().push(name.clone());
    match (name.as_str(), script.status) {
        ("check_status", StatusBehavior::Hang) => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(DaemonResponse::ok().with_status("online"))
        }
        ("check_status", StatusBehavior::Online) => {
            Json(DaemonResponse::ok().with_status("online"))
        }
        _ => Json(DaemonResponse::ok()),
    }
}

async fn scripted_agent(script: Script) -> String {
    let router = Router::new()
        .route("/connect", post(scripted_connect))
        .route("/disconnect", post(scripted_disconnect))
        .route("/command", post(scripted_command))
        .with_state(script);
    serve(router).await
}

fn script(status: StatusBehavior, fail_disconnect: bool) -> Script {
    Script {
        calls: Arc::new(Mutex::new(Vec::new())),
        status,
        fail_disconnect,
    }
}

fn reconciler(endpoint: &str, timeout: Duration) -> (FleetReconciler, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let client = DaemonClient::new(DaemonConfig {
        secret: SECRET.to_string(),
        endpoint: Some(endpoint.to_string()),
        timeout,
        ..DaemonConfig::default()
    })
    .unwrap();
    (FleetReconciler::new(store.clone(), Arc::new(client)), store)
}

fn node(dir: &Path) -> ServerDetails {
    ServerDetails {
        name: "edge-1".to_string(),
        location: "Amsterdam".to_string(),
        ip_address: "127.0.0.1".to_string(),
        port: 443,
        protocol: "tcp".to_string(),
        config_path: dir.join("xray").join("config.json"),
    }
}

fn inbound(port: u16, tag: &str) -> InboundDetails {
    InboundDetails {
        name: tag.to_string(),
        protocol: "vless".to_string(),
        port,
        settings: json!({ "tag": tag, "settings": { "clients": [] } }).to_string(),
        enabled: true,
    }
}

fn direct() -> OutboundDetails {
    OutboundDetails {
        name: "direct".to_string(),
        protocol: "freedom".to_string(),
        settings: json!({ "tag": "direct" }).to_string(),
        enabled: true,
    }
}

fn read_document(dir: &Path) -> Value {
    let text = std::fs::read_to_string(dir.join("xray").join("config.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn actor() -> Actor {
    Actor::from_origin("198.51.100.7")
}

#[tokio::test]
async fn test_document_follows_records_in_store_order() {
    let dir = tempfile::tempdir().unwrap();
    let (reconciler, _store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let id = reconciler.add_node(node(dir.path()), &actor()).await.unwrap().server.id;
    reconciler.add_inbound(id, inbound(443, "a"), &actor()).await.unwrap();
    reconciler.add_inbound(id, inbound(8080, "b"), &actor()).await.unwrap();
    reconciler.add_outbound(id, direct(), &actor()).await.unwrap();

    let doc = read_document(dir.path());
    let inbounds = doc["inbounds"].as_array().unwrap();
    assert_eq!(inbounds.len(), 2);
    assert_eq!(inbounds[0]["port"], json!(443));
    assert_eq!(inbounds[0]["tag"], json!("a"));
    assert_eq!(inbounds[0]["protocol"], json!("vless"));
    assert_eq!(inbounds[1]["port"], json!(8080));
    assert_eq!(inbounds[1]["tag"], json!("b"));
    assert_eq!(doc["outbounds"], json!([{ "protocol": "freedom", "tag": "direct" }]));
}

#[tokio::test]
async fn test_resynthesis_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (reconciler, _store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let id = reconciler.add_node(node(dir.path()), &actor()).await.unwrap().server.id;
    let first = reconciler.add_inbound(id, inbound(443, "a"), &actor()).await.unwrap();
    let path = dir.path().join("xray").join("config.json");
    let before = std::fs::read(&path).unwrap();

    // Rewriting the same record re-synthesizes the same set
    reconciler
        .update_inbound(first.id, inbound(443, "a"), &actor())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), before);

    let rendered = reconciler.render_config(id).await.unwrap().render().unwrap();
    assert_eq!(rendered.as_bytes(), before.as_slice());
}

#[tokio::test]
async fn test_disabled_records_leave_and_return() {
    let dir = tempfile::tempdir().unwrap();
    let (reconciler, _store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let id = reconciler.add_node(node(dir.path()), &actor()).await.unwrap().server.id;
    let a = reconciler.add_inbound(id, inbound(443, "a"), &actor()).await.unwrap();
    reconciler.add_inbound(id, inbound(8080, "b"), &actor()).await.unwrap();

    reconciler.set_inbound_enabled(a.id, false, &actor()).await.unwrap();
    let doc = read_document(dir.path());
    assert_eq!(doc["inbounds"].as_array().unwrap().len(), 1);
    assert_eq!(doc["inbounds"][0]["tag"], json!("b"));

    reconciler.set_inbound_enabled(a.id, true, &actor()).await.unwrap();
    let doc = read_document(dir.path());
    assert_eq!(doc["inbounds"][0]["tag"], json!("a"));
    assert_eq!(doc["inbounds"][1]["tag"], json!("b"));
}

#[tokio::test]
async fn test_duplicate_port_rejected_before_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    let (reconciler, store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let id = reconciler.add_node(node(dir.path()), &actor()).await.unwrap().server.id;
    reconciler.add_inbound(id, inbound(443, "a"), &actor()).await.unwrap();
    let before = read_document(dir.path());

    let err = reconciler
        .add_inbound(id, inbound(443, "dup"), &actor())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        XrError::Store(StoreError::PortInUse { port: 443, .. })
    ));
    assert_eq!(read_document(dir.path()), before);
    assert_eq!(store.list_inbounds(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_connect_then_poll_reports_online() {
    let dir = tempfile::tempdir().unwrap();
    let script = script(StatusBehavior::Online, false);
    let (reconciler, _store) =
        reconciler(&scripted_agent(script.clone()).await, Duration::from_secs(5));

    let outcome = reconciler.add_node(node(dir.path()), &actor()).await.unwrap();
    assert_eq!(outcome.server.session(), Some(&DaemonSessionId::new("d1")));

    let outcome = reconciler.poll_status(outcome.server.id, &actor()).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.server.status().as_str(), "online");
    assert_eq!(outcome.server.session(), Some(&DaemonSessionId::new("d1")));
}

#[tokio::test]
async fn test_poll_timeout_goes_offline_keeping_session() {
    let dir = tempfile::tempdir().unwrap();
    let script = script(StatusBehavior::Hang, false);
    let (reconciler, store) =
        reconciler(&scripted_agent(script.clone()).await, Duration::from_millis(300));

    let id = reconciler.add_node(node(dir.path()), &actor()).await.unwrap().server.id;
    let outcome = reconciler.poll_status(id, &actor()).await.unwrap();

    assert_eq!(outcome.server.status(), &NodeStatus::Offline);
    assert_eq!(outcome.server.session(), Some(&DaemonSessionId::new("d1")));
    assert!(matches!(outcome.failure, Some(DaemonError::Transport(_))));

    let stored = store.get_server(id).await.unwrap();
    assert_eq!(stored.status(), &NodeStatus::Offline);
}

#[tokio::test]
async fn test_delete_disconnects_first_and_removes_regardless() {
    let dir = tempfile::tempdir().unwrap();
    let script = script(StatusBehavior::Online, true);
    let (reconciler, store) =
        reconciler(&scripted_agent(script.clone()).await, Duration::from_secs(5));

    let id = reconciler.add_node(node(dir.path()), &actor()).await.unwrap().server.id;
    let inbound = reconciler.add_inbound(id, inbound(443, "a"), &actor()).await.unwrap();
    let outbound = reconciler.add_outbound(id, direct(), &actor()).await.unwrap();

    let outcome = reconciler.delete_node(id, &actor()).await.unwrap();
    assert!(matches!(outcome.failure, Some(DaemonError::Transport(_))));
    assert_eq!(
        *script.calls.lock().unwrap(),
        vec!["connect".to_string(), "disconnect".to_string()]
    );

    assert!(store.get_server(id).await.is_err());
    assert!(store.get_inbound(inbound.id).await.is_err());
    assert!(store.get_outbound(outbound.id).await.is_err());

    let audit = store.list_audit(Some(id)).await.unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.action, "delete_server");
    assert_eq!(last.origin.as_deref(), Some("198.51.100.7"));
}

#[tokio::test]
async fn test_session_lifecycle_against_reference_agent() {
    let dir = tempfile::tempdir().unwrap();
    let (reconciler, _store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let outcome = reconciler.add_node(node(dir.path()), &actor()).await.unwrap();
    assert!(outcome.is_success());
    let id = outcome.server.id;
    let session = outcome.server.session().cloned().unwrap();
    assert!(session.as_str().starts_with(&format!("daemon_{}_", id)));

    let outcome = reconciler.poll_status(id, &actor()).await.unwrap();
    assert_eq!(outcome.server.status().as_str(), "online");
    assert_eq!(outcome.server.session(), Some(&session));

    let outcome = reconciler.restart_node(id, &actor()).await.unwrap();
    assert_eq!(outcome.server.status(), &NodeStatus::Connected);
    assert_eq!(outcome.server.session(), Some(&session));

    let stats = reconciler
        .run_command(id, "get_stats", serde_json::Map::new(), &actor())
        .await
        .unwrap();
    assert_eq!(stats.extra["stats"]["servers"], json!(1));

    let outcome = reconciler.disconnect_node(id, &actor()).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.server.status(), &NodeStatus::Disconnected);
    assert!(outcome.server.session().is_none());
}

#[tokio::test]
async fn test_pushed_config_lands_at_node_path() {
    let dir = tempfile::tempdir().unwrap();
    let (reconciler, store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let id = reconciler
        .add_node(node(dir.path()), &actor())
        .await
        .unwrap()
        .server
        .id;
    store.insert_inbound(id, inbound(8443, "main")).await.unwrap();
    let document = reconciler.render_config(id).await.unwrap();

    let mut params = serde_json::Map::new();
    params.insert("config".to_string(), serde_json::to_value(&document).unwrap());
    let response = reconciler
        .run_command(id, "update_config", params, &actor())
        .await
        .unwrap();
    assert!(response.success);

    // The agent wrote the rendered document over the synthesized one
    assert_eq!(read_document(dir.path())["inbounds"][0]["port"], json!(8443));

    let outcome = reconciler.poll_status(id, &actor()).await.unwrap();
    assert_eq!(outcome.server.status().as_str(), "online");
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let dir = tempfile::tempdir().unwrap();
    let (reconciler, _store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let outcome = reconciler.add_node(node(dir.path()), &actor()).await.unwrap();
    let id = outcome.server.id;
    let first = outcome.server.session().cloned().unwrap();

    let mut details = node(dir.path());
    details.name = "edge-renamed".to_string();
    let outcome = reconciler.update_node(id, details, &actor()).await.unwrap();
    let second = outcome.server.session().cloned().unwrap();
    assert_ne!(first, second);
    assert_eq!(outcome.server.name, "edge-renamed");
}

#[tokio::test]
async fn test_wrong_secret_leaves_node_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let client = DaemonClient::new(DaemonConfig {
        secret: "not-the-secret".to_string(),
        endpoint: Some(real_agent().await),
        ..DaemonConfig::default()
    })
    .unwrap();
    let reconciler = FleetReconciler::new(store, Arc::new(client));

    let outcome = reconciler.add_node(node(dir.path()), &actor()).await.unwrap();
    assert_eq!(outcome.server.status(), &NodeStatus::Disconnected);
    assert!(matches!(outcome.failure, Some(DaemonError::Transport(_))));
}

#[tokio::test]
async fn test_poll_all_skips_disconnected_nodes() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (reconciler, _store) = reconciler(&real_agent().await, Duration::from_secs(5));

    let a = reconciler.add_node(node(dir_a.path()), &actor()).await.unwrap().server.id;
    let b = reconciler.add_node(node(dir_b.path()), &actor()).await.unwrap().server.id;
    reconciler.disconnect_node(b, &actor()).await.unwrap();

    let results = reconciler.poll_all(&actor()).await.unwrap();
    assert_eq!(results.len(), 1);
    let (id, outcome) = &results[0];
    assert_eq!(*id, a);
    assert_eq!(
        outcome.as_ref().unwrap().server.status().as_str(),
        "online"
    );
}
