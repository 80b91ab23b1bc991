use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// ex: "0.0.0.0:8080"
    pub listen: String,
    /// Upper bound for one relayed command
    pub relay_timeout_secs: u64,
    /// Port of the node agents' HTTP surface when a heartbeat carries a bare IP
    pub node_port: u16,
    /// Age after which a node is reported stale
    pub stale_after_secs: u64,
    pub ap_status: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
            relay_timeout_secs: 5,
            node_port: 5000,
            stale_after_secs: 90,
            ap_status: "online".into(),
        }
    }
}

impl CoordinatorConfig {
    pub fn relay_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn stale_after(&self) -> time::Duration {
        time::Duration::seconds(self.stale_after_secs as i64)
    }
}

pub async fn load_config() -> CoordinatorConfig {
    let path = std::env::var("ORCHARD_COORDINATOR_CONFIG").unwrap_or_else(|_| "coordinator.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from(path: &str) -> CoordinatorConfig {
    if !Path::new(path).exists() {
        info!("no {path}, using default config");
        return CoordinatorConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return CoordinatorConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!("invalid config {path}: {e}");
        CoordinatorConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let cfg = load_config_from("/definitely/not/here.yaml").await;
        assert_eq!(cfg.relay_timeout_secs, 5);
        assert_eq!(cfg.node_port, 5000);
        assert_eq!(cfg.stale_after_secs, 90);
    }

    #[tokio::test]
    async fn test_partial_yaml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relay_timeout_secs: 2\nnode_port: 5001").unwrap();

        let cfg = load_config_from(file.path().to_str().unwrap()).await;
        assert_eq!(cfg.relay_timeout_secs, 2);
        assert_eq!(cfg.node_port, 5001);
        assert_eq!(cfg.listen, "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_invalid_yaml_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relay_timeout_secs: [not, a, number]").unwrap();

        let cfg = load_config_from(file.path().to_str().unwrap()).await;
        assert_eq!(cfg.relay_timeout_secs, 5);
    }
}
