/**
 * COMMAND RELAY - Forwards one action to one node agent over HTTP
 *
 * ROLE: resolve the node's current address in the registry, issue the
 * action with a bounded timeout and report what happened.
 *
 * OUTCOMES (kept distinct for callers):
 * - node answered          -> CommandResult, success flag taken from its payload
 * - node silent past bound -> RelayError::Timeout
 * - connection refused     -> RelayError::Unreachable
 * - anything else          -> RelayError::Failed
 *
 * No retry here: callers decide whether to try again.
 */

use crate::registry::{RegistryError, SharedNodeRegistry};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Node {0} not connected")]
    NodeUnknown(String),
    #[error("No IP address for node {0}")]
    NoAddress(String),
    #[error("Timeout communicating with {identity} after {}ms", .timeout.as_millis())]
    Timeout { identity: String, timeout: Duration },
    #[error("Cannot connect to {identity} at {address}")]
    Unreachable { identity: String, address: String },
    #[error("Relay to {identity} failed: {message}")]
    Failed { identity: String, message: String },
}

impl RelayError {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::NodeUnknown(_) => "node_unknown",
            RelayError::NoAddress(_) => "no_address",
            RelayError::Timeout { .. } => "timeout",
            RelayError::Unreachable { .. } => "unreachable",
            RelayError::Failed { .. } => "relay_error",
        }
    }
}

/// Action to forward to a node
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Legacy single-LED endpoint, acts on the node's first LED
    PrimaryLed { state: String },
    /// Generic device action
    Device {
        device: String,
        action: String,
        value: Option<Value>,
    },
}

impl RelayAction {
    pub fn toggle() -> Self {
        RelayAction::PrimaryLed {
            state: "toggle".to_string(),
        }
    }

    fn path(&self, identity: &str) -> String {
        match self {
            RelayAction::PrimaryLed { .. } => format!("/{identity}/api/v1/actuators/led"),
            RelayAction::Device { device, .. } => {
                format!("/{identity}/api/v1/devices/{device}/action")
            }
        }
    }

    fn body(&self) -> Value {
        match self {
            RelayAction::PrimaryLed { state } => json!({ "state": state }),
            RelayAction::Device { action, value, .. } => match value {
                Some(v) => json!({ "action": action, "value": v }),
                None => json!({ "action": action }),
            },
        }
    }

    fn name(&self) -> &str {
        match self {
            RelayAction::PrimaryLed { state } => state,
            RelayAction::Device { action, .. } => action,
        }
    }
}

/// Result of a relayed action, as answered by the node
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub node: String,
    pub state: Option<String>,
    pub message: String,
    /// HTTP status the node answered with
    pub remote_status: u16,
    /// Node answer, untouched
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

pub struct CommandRelay {
    registry: SharedNodeRegistry,
    client: reqwest::Client,
    timeout: Duration,
    default_port: u16,
}

impl CommandRelay {
    pub fn new(registry: SharedNodeRegistry, timeout: Duration, default_port: u16) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            timeout,
            default_port,
        }
    }

    pub async fn relay(&self, identity: &str, action: &RelayAction) -> Result<CommandResult, RelayError> {
        let descriptor = self.registry.lookup(identity).map_err(|e| match e {
            RegistryError::NotFound(id) => RelayError::NodeUnknown(id),
            RegistryError::EmptyIdentity => RelayError::NodeUnknown(identity.to_string()),
        })?;

        let address = descriptor
            .usable_address()
            .ok_or_else(|| RelayError::NoAddress(identity.to_string()))?;
        let authority = authority(address, self.default_port);
        let url = format!("http://{}{}", authority, action.path(identity));

        debug!(node = %identity, %url, action = action.name(), "relaying command");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&action.body())
            .send()
            .await
            .map_err(|e| self.classify(identity, &authority, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| self.classify(identity, &authority, e))?;

        let reported_success = payload.get("success").and_then(Value::as_bool).unwrap_or(true);
        let success = status.is_success() && reported_success;
        let state = payload.get("state").and_then(Value::as_str).map(str::to_string);
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                if status.is_success() {
                    format!("{} {} on {}", action.name(), if success { "done" } else { "failed" }, identity)
                } else {
                    format!("Node responded with status {}", status.as_u16())
                }
            });

        if success {
            info!(node = %identity, action = action.name(), state = ?state, "command relayed");
        } else {
            warn!(node = %identity, status = status.as_u16(), %message, "node rejected command");
        }

        Ok(CommandResult {
            success,
            node: identity.to_string(),
            state,
            message,
            remote_status: status.as_u16(),
            payload,
            timestamp: OffsetDateTime::now_utc(),
        })
    }

    fn classify(&self, identity: &str, authority: &str, err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            warn!(node = %identity, "relay timed out");
            RelayError::Timeout {
                identity: identity.to_string(),
                timeout: self.timeout,
            }
        } else if err.is_connect() {
            warn!(node = %identity, address = %authority, "node unreachable");
            RelayError::Unreachable {
                identity: identity.to_string(),
                address: authority.to_string(),
            }
        } else {
            warn!(node = %identity, error = %err, "relay failed");
            RelayError::Failed {
                identity: identity.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// host[:port] to dial; the default port is added when the address has none
fn authority(address: &str, default_port: u16) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{ip}]:{default_port}"),
        Ok(IpAddr::V4(ip)) => format!("{ip}:{default_port}"),
        Err(_) => match address.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
            _ => format!("{address}:{default_port}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HeartbeatIn, NodeDescriptor};
    use crate::registry::NodeRegistry;
    use orchard_devkit::{refused_address, MockNode, NodeBehavior};
    use std::sync::Arc;
    use std::time::Instant;

    fn register(registry: &NodeRegistry, identity: &str, ip: Option<&str>) {
        let hb: HeartbeatIn = serde_json::from_value(json!({"node": identity, "ip": ip})).unwrap();
        registry
            .ingest_heartbeat(NodeDescriptor::from_heartbeat(hb, OffsetDateTime::now_utc()))
            .unwrap();
    }

    fn relay_with(registry: Arc<NodeRegistry>, timeout_ms: u64) -> CommandRelay {
        CommandRelay::new(registry, Duration::from_millis(timeout_ms), 5000)
    }

    #[test]
    fn test_authority_adds_default_port() {
        assert_eq!(authority("192.168.4.11", 5000), "192.168.4.11:5000");
        assert_eq!(authority("192.168.4.11:6000", 5000), "192.168.4.11:6000");
        assert_eq!(authority("::1", 5000), "[::1]:5000");
        assert_eq!(authority("pumpkin.local", 5000), "pumpkin.local:5000");
        assert_eq!(authority("pumpkin.local:7000", 5000), "pumpkin.local:7000");
    }

    #[tokio::test]
    async fn test_unknown_node_never_dials() {
        let registry = Arc::new(NodeRegistry::new());
        let node = MockNode::start(NodeBehavior::Respond { status: 200, body: json!({"success": true}) })
            .await
            .unwrap();
        let relay = relay_with(registry, 500);

        let err = relay.relay("ghost", &RelayAction::toggle()).await.unwrap_err();
        assert!(matches!(err, RelayError::NodeUnknown(ref id) if id == "ghost"));
        assert!(node.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_address() {
        let registry = Arc::new(NodeRegistry::new());
        register(&registry, "peach", None);
        register(&registry, "pecan", Some(""));
        let relay = relay_with(registry, 500);

        for id in ["peach", "pecan"] {
            let err = relay.relay(id, &RelayAction::toggle()).await.unwrap_err();
            assert!(matches!(err, RelayError::NoAddress(_)), "{id}: {err:?}");
            assert_eq!(err.kind(), "no_address");
        }
    }

    #[tokio::test]
    async fn test_success_passes_payload_through() {
        let node = MockNode::start(NodeBehavior::Respond {
            status: 200,
            body: json!({"success": true, "state": "on", "message": "LED led_1 toggled on", "device": "led_1"}),
        })
        .await
        .unwrap();
        let registry = Arc::new(NodeRegistry::new());
        register(&registry, "pumpkin", Some(&node.address()));
        let relay = relay_with(registry, 1000);

        let result = relay.relay("pumpkin", &RelayAction::toggle()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.state.as_deref(), Some("on"));
        assert_eq!(result.message, "LED led_1 toggled on");
        assert_eq!(result.remote_status, 200);
        assert_eq!(result.payload["device"], "led_1");

        let requests = node.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/pumpkin/api/v1/actuators/led");
        assert_eq!(requests[0].body, json!({"state": "toggle"}));
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_an_error() {
        let node = MockNode::start(NodeBehavior::Respond {
            status: 404,
            body: json!({"success": false, "message": "Device led_9 not found"}),
        })
        .await
        .unwrap();
        let registry = Arc::new(NodeRegistry::new());
        register(&registry, "cherry", Some(&node.address()));
        let relay = relay_with(registry, 1000);

        let action = RelayAction::Device {
            device: "led_9".into(),
            action: "on".into(),
            value: None,
        };
        let result = relay.relay("cherry", &action).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.remote_status, 404);
        assert_eq!(result.message, "Device led_9 not found");
        assert_eq!(node.requests()[0].path, "/cherry/api/v1/devices/led_9/action");
        assert_eq!(node.requests()[0].body, json!({"action": "on"}));
    }

    #[tokio::test]
    async fn test_silent_node_times_out_at_bound() {
        let node = MockNode::start(NodeBehavior::Hang).await.unwrap();
        let registry = Arc::new(NodeRegistry::new());
        register(&registry, "pecan", Some(&node.address()));
        let relay = relay_with(registry, 300);

        let started = Instant::now();
        let err = relay.relay("pecan", &RelayAction::toggle()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, RelayError::Timeout { .. }), "{err:?}");
        assert!(elapsed >= Duration::from_millis(300), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "hung for {elapsed:?}");
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let registry = Arc::new(NodeRegistry::new());
        register(&registry, "peach", Some(&refused_address().unwrap()));
        let relay = relay_with(registry, 1000);

        let err = relay.relay("peach", &RelayAction::toggle()).await.unwrap_err();
        assert!(matches!(err, RelayError::Unreachable { .. }), "{err:?}");
        assert_eq!(err.kind(), "unreachable");
    }

    #[tokio::test]
    async fn test_non_json_answer_is_relay_error() {
        let node = MockNode::start(NodeBehavior::RespondRaw {
            status: 200,
            body: "<html>hello</html>".into(),
        })
        .await
        .unwrap();
        let registry = Arc::new(NodeRegistry::new());
        register(&registry, "pumpkin", Some(&node.address()));
        let relay = relay_with(registry, 1000);

        let err = relay.relay("pumpkin", &RelayAction::toggle()).await.unwrap_err();
        assert!(matches!(err, RelayError::Failed { .. }), "{err:?}");
    }
}
