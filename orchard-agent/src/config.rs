//! Agent configuration
//!
//! Handles:
//! - Node identity and advertised address
//! - Coordinator endpoint and local listen address
//! - Simulated device set
//! - Initial runtime tunables
//!
//! Loaded from TOML, then overridden by `NODE_NAME`, `ORCHARD_COORDINATOR_URL`
//! and `ORCHARD_AGENT_LISTEN`.

use crate::settings::RuntimeSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub node_name: String,
    /// Address announced in heartbeats; discovered when absent
    pub advertise_ip: Option<String>,
    pub listen: String,
    pub coordinator_url: String,
    /// Mirror of the log output, served by the logs endpoint
    pub log_file: Option<PathBuf>,
    pub devices: DeviceCounts,
    pub settings: RuntimeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCounts {
    pub leds: usize,
    pub pwms: usize,
    pub buttons: usize,
}

impl Default for DeviceCounts {
    fn default() -> Self {
        Self {
            leds: 2,
            pwms: 1,
            buttons: 1,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: gethostname::gethostname().to_string_lossy().to_string(),
            advertise_ip: None,
            listen: "0.0.0.0:5000".to_string(),
            coordinator_url: "http://192.168.4.1".to_string(),
            log_file: None,
            devices: DeviceCounts::default(),
            settings: RuntimeSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Load config from `$ORCHARD_AGENT_CONFIG` or the OS config dir, then env overrides
    pub async fn load() -> Result<Self> {
        let path = match std::env::var("ORCHARD_AGENT_CONFIG") {
            Ok(p) => PathBuf::from(p),
            Err(_) => Self::config_file_path()?,
        };

        let mut config = Self::load_from(&path).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Missing file means first run: defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AgentConfig =
            toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("orchard-agent");
        path.push("config.toml");
        Ok(path)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = non_empty("NODE_NAME") {
            self.node_name = name;
        }
        if let Some(url) = non_empty("ORCHARD_COORDINATOR_URL") {
            self.coordinator_url = url;
        }
        if let Some(listen) = non_empty("ORCHARD_AGENT_LISTEN") {
            self.listen = listen;
        }
    }

    /// Ingest endpoint on the coordinator
    pub fn heartbeat_url(&self) -> String {
        format!("{}/api/heartbeat", self.coordinator_url.trim_end_matches('/'))
    }
}
