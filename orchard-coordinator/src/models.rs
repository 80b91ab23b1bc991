use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

/// One sensor value as reported by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Heartbeat body as pushed by node agents on POST /api/heartbeat
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatIn {
    #[serde(rename = "node")]
    pub identity: String,
    #[serde(rename = "ip", default)]
    pub address: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(rename = "devices", default)]
    pub capabilities: Vec<String>,
    #[serde(rename = "sensor_data", default)]
    pub sensors: HashMap<String, SensorReading>,
    #[serde(default)]
    pub system_info: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

fn default_status() -> String {
    "online".to_string()
}

/// Latest full snapshot of a node, as stored by the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescriptor {
    #[serde(rename = "node")]
    pub identity: String,
    #[serde(rename = "ip")]
    pub address: Option<String>,
    pub status: String,
    #[serde(rename = "devices")]
    pub capabilities: Vec<String>,
    #[serde(rename = "sensor_data")]
    pub sensors: HashMap<String, SensorReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_info: Option<Value>,
    /// Timestamp reported by the node itself
    #[serde(rename = "timestamp")]
    pub reported_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Coordinator clock at ingestion
    #[serde(with = "time::serde::rfc3339")]
    pub last_heartbeat: OffsetDateTime,
}

impl NodeDescriptor {
    pub fn from_heartbeat(hb: HeartbeatIn, received_at: OffsetDateTime) -> Self {
        Self {
            identity: hb.identity,
            address: hb.address,
            status: hb.status,
            capabilities: hb.capabilities,
            sensors: hb.sensors,
            system_info: hb.system_info,
            reported_at: hb.timestamp,
            sequence: hb.sequence,
            last_heartbeat: received_at,
        }
    }

    /// Address usable for relaying, None when missing or blank
    pub fn usable_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

pub type NodesMap = HashMap<String, NodeDescriptor>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_wire_names() {
        let hb: HeartbeatIn = serde_json::from_value(json!({
            "node": "pumpkin",
            "ip": "192.168.4.11",
            "status": "online",
            "devices": ["led_1", "button_1"],
            "sensor_data": {
                "temperature": {"value": 23.4, "unit": "celsius", "timestamp": "2025-01-01T00:00:00"}
            },
            "timestamp": "2025-01-01T00:00:00"
        }))
        .unwrap();

        assert_eq!(hb.identity, "pumpkin");
        assert_eq!(hb.address.as_deref(), Some("192.168.4.11"));
        assert_eq!(hb.capabilities, vec!["led_1", "button_1"]);
        assert_eq!(hb.sensors["temperature"].unit.as_deref(), Some("celsius"));
        assert_eq!(hb.sequence, None);
    }

    #[test]
    fn test_minimal_heartbeat_defaults() {
        let hb: HeartbeatIn = serde_json::from_value(json!({"node": "peach"})).unwrap();
        assert_eq!(hb.status, "online");
        assert!(hb.capabilities.is_empty());
        assert!(hb.sensors.is_empty());
        assert!(hb.address.is_none());
    }

    #[test]
    fn test_usable_address_rejects_blank() {
        let hb: HeartbeatIn = serde_json::from_value(json!({"node": "pecan", "ip": "  "})).unwrap();
        let desc = NodeDescriptor::from_heartbeat(hb, OffsetDateTime::now_utc());
        assert_eq!(desc.usable_address(), None);
    }

    #[test]
    fn test_descriptor_serializes_wire_names() {
        let hb: HeartbeatIn =
            serde_json::from_value(json!({"node": "cherry", "ip": "192.168.4.12"})).unwrap();
        let desc = NodeDescriptor::from_heartbeat(hb, OffsetDateTime::now_utc());
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value["node"], "cherry");
        assert_eq!(value["ip"], "192.168.4.12");
        assert!(value["last_heartbeat"].is_string());
    }
}
