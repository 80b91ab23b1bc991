//! Runtime tunables, changeable through `PUT config`
//!
//! Only a fixed whitelist of keys is accepted. Intervals are whole seconds,
//! never below 1. Unknown keys are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const INTERVAL_KEYS: [&str; 3] = ["heartbeat_interval", "sensor_poll_interval", "led_auto_off_time"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Seconds between heartbeats
    pub heartbeat_interval: u64,
    /// Seconds between sensor samples
    pub sensor_poll_interval: u64,
    /// Seconds before a lit LED is switched off
    pub led_auto_off_time: u64,
    pub debug_mode: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: 30,
            sensor_poll_interval: 5,
            led_auto_off_time: 300,
            debug_mode: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid value for {0}: must be integer")]
    NotAnInteger(String),
}

impl RuntimeSettings {
    /// Applies whitelisted keys and returns the ones updated.
    /// Nothing is applied when any value is invalid.
    pub fn apply_update(&mut self, updates: &Map<String, Value>) -> Result<Vec<String>, SettingsError> {
        let mut next = self.clone();
        let mut updated = Vec::new();

        for (key, value) in updates {
            if INTERVAL_KEYS.contains(&key.as_str()) {
                let secs = as_integer(value)
                    .ok_or_else(|| SettingsError::NotAnInteger(key.clone()))?
                    .max(1) as u64;
                match key.as_str() {
                    "heartbeat_interval" => next.heartbeat_interval = secs,
                    "sensor_poll_interval" => next.sensor_poll_interval = secs,
                    _ => next.led_auto_off_time = secs,
                }
                updated.push(key.clone());
            } else if key == "debug_mode" {
                next.debug_mode = truthy(value);
                updated.push(key.clone());
            }
        }

        *self = next;
        Ok(updated)
    }
}

/// Whole number from a JSON number, numeric string or bool; floats truncate
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
