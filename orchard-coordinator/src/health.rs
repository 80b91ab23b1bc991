use crate::registry::NodeRegistry;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct CoordinatorHealth {
    pub uptime_seconds: u64,
    pub nodes_tracked: u32,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn get_health(&self, registry: &NodeRegistry) -> CoordinatorHealth {
        CoordinatorHealth {
            uptime_seconds: self.uptime_seconds(),
            nodes_tracked: registry.count() as u32,
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            if let Some(mb) = parse_vm_rss_mb(&status) {
                return mb;
            }
        }
    }

    0.0
}

/// VmRSS line of /proc/<pid>/status, KB -> MB
fn parse_vm_rss_mb(status: &str) -> Option<f32> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb as f32 / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\torchard\nVmPeak:\t  20480 kB\nVmRSS:\t   10240 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss_mb(status), Some(10.0));
        assert_eq!(parse_vm_rss_mb("Name:\torchard\n"), None);
    }

    #[test]
    fn test_health_counts_nodes() {
        let registry = NodeRegistry::new();
        let health = HealthTracker::new().get_health(&registry);
        assert_eq!(health.nodes_tracked, 0);
    }
}
