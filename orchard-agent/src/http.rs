//! HTTP surface of the node agent
//!
//! Everything node-specific is nested under `/<identity>/api/v1`; `/health`
//! and `/ping` stay at the root for health checks.

use crate::devices::{ActionOutcome, DeviceError, DeviceManager};
use crate::logging::{LogControl, LogError};
use crate::sensors::SensorStore;
use crate::settings::{RuntimeSettings, SettingsError};
use crate::state::Shared;
use crate::system::SystemSnapshot;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const API_VERSION: &str = "2.0";
const DEFAULT_LOG_LINES: usize = 50;

#[derive(Clone)]
pub struct AgentState {
    pub identity: String,
    pub ip: String,
    pub devices: DeviceManager,
    pub sensors: SensorStore,
    pub settings: Shared<RuntimeSettings>,
    pub logs: Arc<LogControl>,
    pub last_heartbeat: Shared<Option<DateTime<Utc>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Sensor {0} not found")]
    SensorNotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Logs(#[from] LogError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Device(DeviceError::NotFound(_) | DeviceError::NoLed) => StatusCode::NOT_FOUND,
            ApiError::Device(_) => StatusCode::BAD_REQUEST,
            ApiError::SensorNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Settings(_) => StatusCode::BAD_REQUEST,
            ApiError::Logs(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Device(DeviceError::NotFound(_)) => "device_not_found",
            ApiError::Device(DeviceError::NoLed) => "no_led",
            ApiError::Device(DeviceError::UnsupportedAction { .. }) => "unsupported_action",
            ApiError::Device(DeviceError::InvalidValue { .. }) => "invalid_value",
            ApiError::SensorNotFound(_) => "sensor_not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Settings(_) => "invalid_config",
            ApiError::Logs(_) => "logs_unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.kind(),
            "message": self.to_string(),
            "timestamp": Utc::now(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Any response body plus the server timestamp
#[derive(Serialize)]
struct Stamped<T: Serialize> {
    #[serde(flatten)]
    inner: T,
    timestamp: DateTime<Utc>,
}

fn stamped<T: Serialize>(inner: T) -> Json<Stamped<T>> {
    Json(Stamped {
        inner,
        timestamp: Utc::now(),
    })
}

/// JSON object body; an empty body counts as `{}`
fn json_object(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::BadRequest("Request body must be a JSON object".into())),
        Err(e) => Err(ApiError::BadRequest(format!("Invalid JSON body: {e}"))),
    }
}

pub fn build_router(state: AgentState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/info", get(get_info))
        .route("/devices", get(list_devices))
        .route("/devices/{name}", get(get_device))
        .route("/devices/{name}/action", post(device_action))
        .route("/devices/{name}/config", put(update_device_config))
        .route("/actuators/led", post(control_primary_led))
        .route("/sensors", get(list_sensors))
        .route("/sensors/{name}", get(get_sensor))
        .route("/config", get(get_config).put(update_config))
        .route("/logs", get(get_logs));

    Router::new()
        .nest(&format!("/{}/api/v1", state.identity), api)
        .route("/health", get(health))
        .route("/ping", get(ping))
        .with_state(state)
}

// ===== read-only =====

async fn get_status(State(app): State<AgentState>) -> Json<Value> {
    let last_heartbeat = *app.last_heartbeat.lock();
    let config = app.settings.lock().clone();
    Json(json!({
        "node": app.identity,
        "ip": app.ip,
        "status": "online",
        "timestamp": Utc::now(),
        "devices": app.devices.names(),
        "device_status": app.devices.status_all(),
        "last_heartbeat": last_heartbeat,
        "sensor_data": app.sensors.snapshot(),
        "system_info": SystemSnapshot::collect(&app.ip),
        "config": config,
    }))
}

async fn get_info(State(app): State<AgentState>) -> Json<Value> {
    let base = format!("/{}/api/v1", app.identity);
    Json(json!({
        "node": app.identity,
        "ip": app.ip,
        "capabilities": {
            "gpio_available": false,
            "device_count": app.devices.count(),
            "api_version": API_VERSION,
        },
        "api_endpoints": {
            "GET": [
                format!("{base}/status"),
                format!("{base}/devices"),
                format!("{base}/sensors"),
                format!("{base}/config"),
                format!("{base}/logs"),
            ],
            "POST": [
                format!("{base}/devices/<device_name>/action"),
                format!("{base}/actuators/led"),
            ],
            "PUT": [
                format!("{base}/config"),
                format!("{base}/devices/<device_name>/config"),
            ],
        },
        "timestamp": Utc::now(),
    }))
}

async fn list_devices(State(app): State<AgentState>) -> Json<Value> {
    Json(json!({
        "devices": app.devices.status_all(),
        "count": app.devices.count(),
        "timestamp": Utc::now(),
    }))
}

async fn get_device(State(app): State<AgentState>, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    let status = app.devices.status(&name)?;
    Ok(Json(json!({
        "device": name,
        "status": status,
        "timestamp": Utc::now(),
    })))
}

async fn list_sensors(State(app): State<AgentState>) -> Json<Value> {
    let data = app.sensors.snapshot();
    Json(json!({
        "sensors": data.keys().collect::<Vec<_>>(),
        "count": data.len(),
        "data": data,
        "timestamp": Utc::now(),
    }))
}

async fn get_sensor(State(app): State<AgentState>, Path(name): Path<String>) -> Result<Json<Value>, ApiError> {
    let reading = app
        .sensors
        .get(&name)
        .ok_or_else(|| ApiError::SensorNotFound(name.clone()))?;
    Ok(Json(json!({
        "sensor": name,
        "data": reading,
        "timestamp": Utc::now(),
    })))
}

async fn get_config(State(app): State<AgentState>) -> Json<Value> {
    let config = app.settings.lock().clone();
    Json(json!({ "config": config, "timestamp": Utc::now() }))
}

async fn get_logs(
    State(app): State<AgentState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let lines = match params.get("lines") {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| ApiError::BadRequest(format!("Invalid lines parameter: {raw}")))?,
        None => DEFAULT_LOG_LINES,
    };
    let logs = app.logs.tail(lines).await?;
    Ok(Json(json!({
        "lines": logs.len(),
        "logs": logs,
        "timestamp": Utc::now(),
    })))
}

// ===== control =====

async fn device_action(
    State(app): State<AgentState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Stamped<ActionOutcome>>, ApiError> {
    // unknown device wins over a bad body
    app.devices.status(&name)?;

    let body = json_object(&body)?;
    let action = body
        .get("action")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Action parameter required".into()))?;

    let outcome = app.devices.execute(&name, action, body.get("value"))?;
    info!(device = %name, action, "{}", outcome.message);
    Ok(stamped(outcome))
}

async fn control_primary_led(
    State(app): State<AgentState>,
    body: Bytes,
) -> Result<Json<Stamped<ActionOutcome>>, ApiError> {
    let body = json_object(&body)?;
    let state = match body.get("state") {
        None | Some(Value::Null) => "off",
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(ApiError::BadRequest(format!("Invalid state: {other}"))),
    };

    let outcome = app.devices.control_primary_led(state)?;
    info!(device = %outcome.device, "{}", outcome.message);
    Ok(stamped(outcome))
}

async fn update_config(State(app): State<AgentState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let updates = json_object(&body)?;
    let (updated_keys, config) = {
        let mut settings = app.settings.lock();
        let updated = settings.apply_update(&updates)?;
        (updated, settings.clone())
    };

    if updated_keys.iter().any(|k| k == "debug_mode") {
        app.logs.set_debug(config.debug_mode);
    }
    debug!(?updated_keys, "config updated");

    Ok(Json(json!({
        "success": true,
        "updated_keys": updated_keys,
        "config": config,
        "timestamp": Utc::now(),
    })))
}

async fn update_device_config(
    State(app): State<AgentState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    app.devices.status(&name)?;
    let config = json_object(&body)?;
    let status = app.devices.configure(&name, &config)?;
    Ok(Json(json!({
        "success": true,
        "device": name,
        "message": "Device configuration updated",
        "status": status,
        "timestamp": Utc::now(),
    })))
}

// ===== health =====

async fn health(State(app): State<AgentState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "node": app.identity,
        "ip": app.ip,
        "timestamp": Utc::now(),
    }))
}

async fn ping() -> Json<Value> {
    Json(json!({ "pong": true, "timestamp": Utc::now() }))
}
