/*!
Test helpers for Orchard components

- Serve any axum router on a loopback port
- Produce an address that refuses connections
- Build heartbeat payloads in the agent wire format
*/

use anyhow::{Context, Result};
use axum::Router;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Init logging for tests (idempotent)
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Serves a router on 127.0.0.1 and returns the bound address.
/// The server task lives until the test runtime shuts down.
pub async fn serve_router(router: Router) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test listener")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            log::error!("test server stopped: {}", e);
        }
    });
    Ok(addr)
}

/// An address nothing listens on: the port was bound then released.
pub fn refused_address() -> Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}

/// Builder for heartbeat payloads (same field names the node agent sends)
#[derive(Debug, Clone)]
pub struct HeartbeatBuilder {
    node: String,
    ip: Option<String>,
    status: String,
    devices: Vec<String>,
    sensor_data: Map<String, Value>,
    sequence: Option<u64>,
}

impl HeartbeatBuilder {
    pub fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            ip: None,
            status: "online".to_string(),
            devices: Vec::new(),
            sensor_data: Map::new(),
            sequence: None,
        }
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn devices(mut self, devices: &[&str]) -> Self {
        self.devices = devices.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn sensor(mut self, name: &str, value: Value, unit: &str) -> Self {
        self.sensor_data.insert(
            name.to_string(),
            json!({
                "value": value,
                "unit": unit,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );
        self
    }

    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn build(&self) -> Value {
        let mut payload = json!({
            "node": self.node,
            "status": self.status,
            "devices": self.devices,
            "sensor_data": self.sensor_data,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(ip) = &self.ip {
            payload["ip"] = json!(ip);
        }
        if let Some(sequence) = self.sequence {
            payload["sequence"] = json!(sequence);
        }
        payload
    }
}
