//! Heartbeat loop: pushes the node's full snapshot to the coordinator
//!
//! Every cycle sends identity, address, device list, latest sensor readings
//! and coarse system health. A failed push is logged and left to the next
//! cycle; the loop itself never stops.

use crate::devices::DeviceManager;
use crate::sensors::{SensorReading, SensorStore};
use crate::settings::RuntimeSettings;
use crate::state::Shared;
use crate::system::SystemSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of POST /api/heartbeat
#[derive(Debug, Serialize)]
pub struct HeartbeatPayload {
    pub node: String,
    pub ip: String,
    pub status: String,
    pub devices: Vec<String>,
    pub sensor_data: BTreeMap<String, SensorReading>,
    pub system_info: SystemSnapshot,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("heartbeat request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("coordinator answered {0}")]
    Rejected(u16),
}

pub struct HeartbeatSender {
    client: reqwest::Client,
    url: String,
    identity: String,
    ip: String,
    devices: DeviceManager,
    sensors: SensorStore,
    timeout: Duration,
    /// Seeded from the boot time so a restarted agent outranks its previous run
    sequence: u64,
    last_heartbeat: Shared<Option<DateTime<Utc>>>,
}

impl HeartbeatSender {
    pub fn new(
        url: String,
        identity: String,
        ip: String,
        devices: DeviceManager,
        sensors: SensorStore,
        last_heartbeat: Shared<Option<DateTime<Utc>>>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            identity,
            ip,
            devices,
            sensors,
            timeout: HEARTBEAT_TIMEOUT,
            sequence: Utc::now().timestamp_millis().max(0) as u64,
            last_heartbeat,
        }
    }

    fn next_payload(&mut self) -> HeartbeatPayload {
        self.sequence += 1;
        HeartbeatPayload {
            node: self.identity.clone(),
            ip: self.ip.clone(),
            status: "online".to_string(),
            devices: self.devices.names(),
            sensor_data: self.sensors.snapshot(),
            system_info: SystemSnapshot::collect(&self.ip),
            timestamp: Utc::now(),
            sequence: self.sequence,
        }
    }

    pub async fn send_once(&mut self) -> Result<(), HeartbeatError> {
        let payload = self.next_payload();
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HeartbeatError::Rejected(status.as_u16()));
        }

        *self.last_heartbeat.lock() = Some(Utc::now());
        debug!("Heartbeat {} sent to {}", payload.sequence, self.url);
        Ok(())
    }

    /// Sends forever; the interval is re-read every cycle
    pub fn spawn(mut self, settings: Shared<RuntimeSettings>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Heartbeat loop started towards {}", self.url);
            loop {
                if let Err(e) = self.send_once().await {
                    warn!("Heartbeat failed: {}", e);
                }
                let secs = settings.lock().heartbeat_interval.max(1);
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
        })
    }
}
