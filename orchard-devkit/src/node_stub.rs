/*!
Mock node server for relay tests without real hardware

Starts an HTTP server on a loopback port that plays the role of a node agent.
Every request it receives is recorded so tests can assert on the path and
body the coordinator actually sent.
*/

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// How the mock node answers
#[derive(Debug, Clone)]
pub enum NodeBehavior {
    /// Answer every request with this status and JSON body
    Respond { status: u16, body: Value },
    /// Answer with a non-JSON body
    RespondRaw { status: u16, body: String },
    /// Accept the connection and never write a byte back
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

#[derive(Clone)]
struct StubState {
    behavior: NodeBehavior,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Mock node agent bound to 127.0.0.1
pub struct MockNode {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockNode {
    pub async fn start(behavior: NodeBehavior) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock node listener")?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = match behavior {
            NodeBehavior::Hang => {
                let connections = connections.clone();
                tokio::spawn(async move {
                    // Sockets are kept open so the peer sees silence, not a reset
                    let mut held = Vec::new();
                    while let Ok((socket, _)) = listener.accept().await {
                        connections.fetch_add(1, Ordering::SeqCst);
                        held.push(socket);
                    }
                })
            }
            behavior => {
                let state = StubState {
                    behavior,
                    requests: requests.clone(),
                };
                let app = Router::new().fallback(record_and_answer).with_state(state);
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        log::error!("[MOCK] node server stopped: {}", e);
                    }
                })
            }
        };

        log::info!("🍏 [MOCK] node listening on {}", addr);
        Ok(Self {
            addr,
            requests,
            connections,
            task,
        })
    }

    /// Address in the form a heartbeat would carry it ("127.0.0.1:port")
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Connections accepted by a hanging node
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn record_and_answer(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let body_json = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));

    if let Ok(mut requests) = state.requests.lock() {
        requests.push(RecordedRequest {
            method: method.to_string(),
            path: uri.path().to_string(),
            body: body_json,
        });
    }

    match state.behavior {
        NodeBehavior::Respond { status, body } => {
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            (code, axum::Json(body)).into_response()
        }
        NodeBehavior::RespondRaw { status, body } => {
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            (code, body).into_response()
        }
        NodeBehavior::Hang => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_node_records_requests() {
        init_test_logging();
        let node = MockNode::start(NodeBehavior::Respond {
            status: 200,
            body: json!({"success": true, "state": "on"}),
        })
        .await
        .unwrap();

        let url = format!("http://{}/pumpkin/api/v1/actuators/led", node.address());
        let resp = reqwest::Client::new()
            .post(&url)
            .json(&json!({"state": "toggle"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let recorded = node.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].method, "POST");
        assert_eq!(recorded[0].path, "/pumpkin/api/v1/actuators/led");
        assert_eq!(recorded[0].body, json!({"state": "toggle"}));
    }

    #[tokio::test]
    async fn test_hanging_node_never_answers() {
        init_test_logging();
        let node = MockNode::start(NodeBehavior::Hang).await.unwrap();
        let url = format!("http://{}/ping", node.address());

        let err = reqwest::Client::new()
            .get(&url)
            .timeout(std::time::Duration::from_millis(150))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(node.connection_count(), 1);
    }
}
