/**
 * COORDINATOR API - HTTP surface of the fleet coordinator
 *
 * ROLE:
 * Heartbeat ingestion for node agents, status reporting for the dashboard
 * and command relay entry points for operators.
 *
 * ROUTES:
 * - POST /api/heartbeat                                 ingest one node snapshot
 * - GET  /api/status, /api/nodes                        registry views
 * - POST /api/led/{identity}/toggle                     relay toggle to one node
 * - POST /api/led/toggle-all                            relay toggle to every node
 * - POST /api/nodes/{identity}/devices/{device}/action  generic device relay
 * - GET  /health, /api/health                           coordinator liveness
 *
 * ERRORS:
 * Every failure is answered with {success: false, error, message, timestamp}
 * and a status code per kind. No handler panics on a bad request or a dead node.
 */

use crate::config::CoordinatorConfig;
use crate::health::{CoordinatorHealth, HealthTracker};
use crate::liveness::{to_view, NodeView};
use crate::models::{HeartbeatIn, NodeDescriptor};
use crate::registry::{IngestOutcome, NodeRegistry, RegistryError, SharedNodeRegistry};
use crate::relay::{CommandRelay, CommandResult, RelayAction, RelayError};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedNodeRegistry,
    pub relay: Arc<CommandRelay>,
    pub health: HealthTracker,
    pub cfg: Arc<CoordinatorConfig>,
}

impl AppState {
    pub fn new(cfg: CoordinatorConfig) -> Self {
        let registry: SharedNodeRegistry = Arc::new(NodeRegistry::new());
        let relay = CommandRelay::new(registry.clone(), cfg.relay_timeout(), cfg.node_port);
        Self {
            registry,
            relay: Arc::new(relay),
            health: HealthTracker::new(),
            cfg: Arc::new(cfg),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    Parse(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Parse(_) => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::EmptyIdentity) => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Relay(e) => match e {
                RelayError::NodeUnknown(_) => StatusCode::NOT_FOUND,
                RelayError::NoAddress(_) => StatusCode::BAD_REQUEST,
                RelayError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
                RelayError::Unreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                RelayError::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Parse(_) => "parse_error",
            ApiError::Registry(RegistryError::EmptyIdentity) => "parse_error",
            ApiError::Registry(RegistryError::NotFound(_)) => "node_unknown",
            ApiError::Relay(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.kind(),
            "message": self.to_string(),
            "timestamp": now_rfc3339(),
        });
        (self.status(), Json(body)).into_response()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Bodies are parsed by hand so a malformed one still gets the structured error
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::Parse(e.to_string()))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/health", get(get_health))
        .route("/api/heartbeat", post(receive_heartbeat))
        .route("/api/status", get(get_status))
        .route("/api/nodes", get(list_nodes))
        .route("/api/led/toggle-all", post(toggle_all))
        .route("/api/led/{identity}/toggle", post(toggle_led))
        .route("/api/nodes/{identity}/devices/{device}/action", post(device_action))
        .with_state(app_state)
}

// GET /api/health
async fn get_health(State(app): State<AppState>) -> Json<CoordinatorHealth> {
    Json(app.health.get_health(&app.registry))
}

// POST /api/heartbeat
async fn receive_heartbeat(State(app): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let heartbeat: HeartbeatIn = parse_body(&body)?;
    let identity = heartbeat.identity.clone();
    let descriptor = NodeDescriptor::from_heartbeat(heartbeat, OffsetDateTime::now_utc());

    let status = match app.registry.ingest_heartbeat(descriptor)? {
        IngestOutcome::Created | IngestOutcome::Updated => "received",
        IngestOutcome::Stale { .. } => "stale",
    };
    debug!(node = %identity, status, "heartbeat");

    Ok(Json(json!({
        "status": status,
        "node": identity,
        "timestamp": now_rfc3339(),
    })))
}

#[derive(Serialize)]
struct StatusReport {
    ap_status: String,
    connected_clients: HashMap<String, NodeView>,
    client_count: usize,
    online_count: usize,
    timestamp: String,
    uptime: u64,
}

// GET /api/status
async fn get_status(State(app): State<AppState>) -> Json<StatusReport> {
    let now = OffsetDateTime::now_utc();
    let threshold = app.cfg.stale_after();
    let connected_clients: HashMap<String, NodeView> = app
        .registry
        .snapshot()
        .iter()
        .map(|(id, desc)| (id.clone(), to_view(desc, now, threshold)))
        .collect();
    let online_count = connected_clients.values().filter(|v| !v.stale).count();

    Json(StatusReport {
        ap_status: app.cfg.ap_status.clone(),
        client_count: connected_clients.len(),
        online_count,
        connected_clients,
        timestamp: now_rfc3339(),
        uptime: app.health.uptime_seconds(),
    })
}

// GET /api/nodes
async fn list_nodes(State(app): State<AppState>) -> Json<Value> {
    let listing = app.registry.list_nodes();
    Json(json!({
        "nodes": listing.nodes,
        "count": listing.count,
        "details": app.registry.snapshot(),
        "timestamp": now_rfc3339(),
    }))
}

/// Node answer relayed back to the caller, keeping the node's status code
fn relayed(result: CommandResult) -> Response {
    let code = if (200..300).contains(&result.remote_status) {
        StatusCode::OK
    } else {
        StatusCode::from_u16(result.remote_status).unwrap_or(StatusCode::BAD_GATEWAY)
    };
    (code, Json(result)).into_response()
}

// POST /api/led/{identity}/toggle
async fn toggle_led(State(app): State<AppState>, Path(identity): Path<String>) -> Result<Response, ApiError> {
    let result = app.relay.relay(&identity, &RelayAction::toggle()).await?;
    Ok(relayed(result))
}

#[derive(Debug, Serialize)]
struct NodeOutcome {
    node: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

// POST /api/led/toggle-all
async fn toggle_all(State(app): State<AppState>) -> Json<Value> {
    let identities = app.registry.list_nodes().nodes;
    let action = RelayAction::toggle();

    // One independent relay per node; a failure never blocks the others
    let results = futures::future::join_all(identities.iter().map(|id| app.relay.relay(id, &action))).await;

    let outcomes: Vec<NodeOutcome> = identities
        .into_iter()
        .zip(results)
        .map(|(node, result)| match result {
            Ok(r) => NodeOutcome {
                node,
                success: r.success,
                state: r.state,
                message: r.message,
                error: None,
            },
            Err(e) => NodeOutcome {
                node,
                success: false,
                state: None,
                message: e.to_string(),
                error: Some(e.kind()),
            },
        })
        .collect();

    let succeeded = outcomes.iter().filter(|o| o.success).count();
    info!(total = outcomes.len(), succeeded, "fleet toggle");
    if succeeded < outcomes.len() {
        warn!(failed = outcomes.len() - succeeded, "fleet toggle incomplete");
    }

    Json(json!({
        "success": true,
        "total": outcomes.len(),
        "succeeded": succeeded,
        "results": outcomes,
        "timestamp": now_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct DeviceActionBody {
    action: String,
    #[serde(default)]
    value: Option<Value>,
}

// POST /api/nodes/{identity}/devices/{device}/action
async fn device_action(
    State(app): State<AppState>,
    Path((identity, device)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: DeviceActionBody = parse_body(&body)?;
    let action = RelayAction::Device {
        device,
        action: body.action,
        value: body.value,
    };
    let result = app.relay.relay(&identity, &action).await?;
    Ok(relayed(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_devkit::{refused_address, serve_router, HeartbeatBuilder, MockNode, NodeBehavior};
    use std::time::Duration;

    async fn start(state: AppState) -> String {
        let addr = serve_router(build_router(state)).await.unwrap();
        format!("http://{addr}")
    }

    fn state_with_timeout(timeout: Duration) -> AppState {
        let mut state = AppState::new(CoordinatorConfig::default());
        state.relay = Arc::new(CommandRelay::new(state.registry.clone(), timeout, 5000));
        state
    }

    async fn post_heartbeat(base: &str, payload: &Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}/api/heartbeat"))
            .json(payload)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_then_status() {
        let state = AppState::new(CoordinatorConfig::default());
        let base = start(state.clone()).await;

        let payload = HeartbeatBuilder::new("pumpkin")
            .ip("192.168.4.11")
            .devices(&["led_1", "button_1"])
            .sensor("temperature", json!(22.5), "celsius")
            .build();
        let resp = post_heartbeat(&base, &payload).await;
        assert_eq!(resp.status(), 200);
        let ack: Value = resp.json().await.unwrap();
        assert_eq!(ack["status"], "received");
        assert!(ack["timestamp"].is_string());

        let status: Value = reqwest::get(format!("{base}/api/status")).await.unwrap().json().await.unwrap();
        assert_eq!(status["ap_status"], "online");
        assert_eq!(status["client_count"], 1);
        assert_eq!(status["online_count"], 1);
        assert_eq!(status["connected_clients"]["pumpkin"]["ip"], "192.168.4.11");
        assert_eq!(status["connected_clients"]["pumpkin"]["stale"], false);

        let nodes: Value = reqwest::get(format!("{base}/api/nodes")).await.unwrap().json().await.unwrap();
        assert_eq!(nodes["nodes"], json!(["pumpkin"]));
        assert_eq!(nodes["details"]["pumpkin"]["devices"], json!(["led_1", "button_1"]));
    }

    #[tokio::test]
    async fn test_malformed_heartbeat_is_structured_400() {
        let state = AppState::new(CoordinatorConfig::default());
        let base = start(state.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/heartbeat"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "parse_error");
        assert!(body["message"].is_string());

        let resp = post_heartbeat(&base, &json!({"node": ""})).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(state.registry.count(), 0);
    }

    #[tokio::test]
    async fn test_stale_heartbeat_acknowledged_but_ignored() {
        let state = AppState::new(CoordinatorConfig::default());
        let base = start(state.clone()).await;

        post_heartbeat(&base, &HeartbeatBuilder::new("peach").ip("10.0.0.2").sequence(5).build()).await;
        let resp = post_heartbeat(&base, &HeartbeatBuilder::new("peach").ip("10.0.0.9").sequence(4).build()).await;
        assert_eq!(resp.status(), 200);
        let ack: Value = resp.json().await.unwrap();
        assert_eq!(ack["status"], "stale");
        assert_eq!(state.registry.lookup("peach").unwrap().address.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_toggle_error_codes() {
        let state = state_with_timeout(Duration::from_millis(300));
        let base = start(state.clone()).await;
        let hanging = MockNode::start(NodeBehavior::Hang).await.unwrap();
        let garbled = MockNode::start(NodeBehavior::RespondRaw {
            status: 200,
            body: "<html>not json</html>".into(),
        })
        .await
        .unwrap();

        post_heartbeat(&base, &HeartbeatBuilder::new("noaddr").build()).await;
        post_heartbeat(&base, &HeartbeatBuilder::new("slow").ip(&hanging.address()).build()).await;
        post_heartbeat(&base, &HeartbeatBuilder::new("gone").ip(&refused_address().unwrap()).build()).await;
        post_heartbeat(&base, &HeartbeatBuilder::new("garbled").ip(&garbled.address()).build()).await;

        let client = reqwest::Client::new();
        for (node, code, kind) in [
            ("ghost", 404, "node_unknown"),
            ("noaddr", 400, "no_address"),
            ("slow", 408, "timeout"),
            ("gone", 503, "unreachable"),
            ("garbled", 500, "relay_error"),
        ] {
            let resp = client.post(format!("{base}/api/led/{node}/toggle")).send().await.unwrap();
            assert_eq!(resp.status().as_u16(), code, "{node}");
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], kind);
            assert!(body["message"].as_str().unwrap().len() > 0);
        }
    }

    #[tokio::test]
    async fn test_toggle_passes_node_answer() {
        let node = MockNode::start(NodeBehavior::Respond {
            status: 200,
            body: json!({"success": true, "state": "off", "device": "led_1"}),
        })
        .await
        .unwrap();
        let state = AppState::new(CoordinatorConfig::default());
        let base = start(state.clone()).await;
        post_heartbeat(&base, &HeartbeatBuilder::new("cherry").ip(&node.address()).build()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/led/cherry/toggle"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["state"], "off");
        assert_eq!(body["node"], "cherry");
        assert_eq!(body["payload"]["device"], "led_1");
    }

    #[tokio::test]
    async fn test_remote_status_passed_through() {
        let node = MockNode::start(NodeBehavior::Respond {
            status: 404,
            body: json!({"success": false, "message": "Device led_7 not found"}),
        })
        .await
        .unwrap();
        let state = AppState::new(CoordinatorConfig::default());
        let base = start(state.clone()).await;
        post_heartbeat(&base, &HeartbeatBuilder::new("pecan").ip(&node.address()).build()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/nodes/pecan/devices/led_7/action"))
            .json(&json!({"action": "on"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Device led_7 not found");
    }

    #[tokio::test]
    async fn test_device_action_requires_action() {
        let state = AppState::new(CoordinatorConfig::default());
        let base = start(state).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/nodes/pecan/devices/led_1/action"))
            .json(&json!({"value": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "parse_error");
    }

    #[tokio::test]
    async fn test_toggle_all_isolates_failures() {
        let good = MockNode::start(NodeBehavior::Respond {
            status: 200,
            body: json!({"success": true, "state": "on"}),
        })
        .await
        .unwrap();
        let state = state_with_timeout(Duration::from_millis(500));
        let base = start(state.clone()).await;

        post_heartbeat(&base, &HeartbeatBuilder::new("alpha").ip(&good.address()).build()).await;
        post_heartbeat(&base, &HeartbeatBuilder::new("beta").ip(&refused_address().unwrap()).build()).await;
        post_heartbeat(&base, &HeartbeatBuilder::new("gamma").build()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/led/toggle-all"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["total"], 3);
        assert_eq!(body["succeeded"], 1);

        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0]["node"], "alpha");
        assert_eq!(results[0]["state"], "on");
        assert_eq!(results[1]["error"], "unreachable");
        assert_eq!(results[2]["error"], "no_address");
        assert_eq!(good.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_health_routes() {
        let base = start(AppState::new(CoordinatorConfig::default())).await;
        let text = reqwest::get(format!("{base}/health")).await.unwrap().text().await.unwrap();
        assert_eq!(text, "ok");

        let health: Value = reqwest::get(format!("{base}/api/health")).await.unwrap().json().await.unwrap();
        assert_eq!(health["nodes_tracked"], 0);
        assert!(health["uptime_seconds"].is_u64());
    }
}
