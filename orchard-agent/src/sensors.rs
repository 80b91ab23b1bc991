//! Sensor readings of the node and the loop that refreshes them
//!
//! - Pressed buttons are recorded as `<button>_press`
//! - Board temperature comes from sysinfo components as `cpu_temperature`

use crate::devices::DeviceManager;
use crate::settings::RuntimeSettings;
use crate::state::Shared;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Components;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Labels tried in order when looking for the CPU/SoC temperature
const CPU_TEMPERATURE_LABELS: &[&str] = &["cpu", "soc", "package", "core", "k10temp", "coretemp"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Latest reading per sensor name; written by the sampler, read by the API and heartbeats
#[derive(Clone, Default)]
pub struct SensorStore {
    readings: Arc<RwLock<BTreeMap<String, SensorReading>>>,
}

impl SensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, value: Value, unit: Option<&str>) {
        self.readings.write().insert(
            name.to_string(),
            SensorReading {
                value,
                unit: unit.map(str::to_string),
                timestamp: Utc::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<SensorReading> {
        self.readings.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, SensorReading> {
        self.readings.read().clone()
    }
}

pub struct SensorSampler {
    devices: DeviceManager,
    store: SensorStore,
    components: Components,
}

impl SensorSampler {
    pub fn new(devices: DeviceManager, store: SensorStore) -> Self {
        Self {
            devices,
            store,
            components: Components::new_with_refreshed_list(),
        }
    }

    /// One pass over every source
    pub fn sample_once(&mut self) {
        for button in self.devices.pressed_buttons() {
            self.store.record(&format!("{button}_press"), Value::from("pressed"), None);
        }

        self.components.refresh();
        if let Some(celsius) = cpu_temperature(&self.components) {
            let rounded = (celsius as f64 * 10.0).round() / 10.0;
            self.store.record("cpu_temperature", Value::from(rounded), Some("celsius"));
        }
    }

    /// Samples forever; the poll interval is re-read every cycle
    pub fn spawn(mut self, settings: Shared<RuntimeSettings>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Sensor sampler started");
            loop {
                self.sample_once();
                debug!("Sensors sampled");
                let secs = settings.lock().sensor_poll_interval.max(1);
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
        })
    }
}

fn cpu_temperature(components: &Components) -> Option<f32> {
    let readings: Vec<(String, f32)> = components
        .iter()
        .map(|c| (c.label().to_lowercase(), c.temperature()))
        .filter(|(_, t)| t.is_finite() && *t > 0.0)
        .collect();

    CPU_TEMPERATURE_LABELS
        .iter()
        .find_map(|wanted| readings.iter().find(|(label, _)| label.contains(wanted)))
        .or_else(|| readings.first())
        .map(|(_, t)| *t)
}
