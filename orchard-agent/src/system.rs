//! Coarse system health of the node, carried in heartbeats and status
//!
//! Uptime, load averages and memory from sysinfo, plus the address the node
//! announces to the coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use sysinfo::System;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub hostname: String,
    pub ip: String,
    pub uptime_seconds: u64,
    pub load_average: [f64; 3], // [1min, 5min, 15min]
    pub memory: MemorySnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub total_mb: u64,
    pub used_mb: u64,
    pub percent_used: f32,
}

impl SystemSnapshot {
    pub fn collect(ip: &str) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let load_average = if cfg!(unix) {
            let load = System::load_average();
            [load.one, load.five, load.fifteen]
        } else {
            [0.0, 0.0, 0.0]
        };

        Self {
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            ip: ip.to_string(),
            uptime_seconds: System::uptime(),
            load_average,
            memory: MemorySnapshot::from_bytes(sys.total_memory(), sys.available_memory()),
            timestamp: Utc::now(),
        }
    }
}

impl MemorySnapshot {
    fn from_bytes(total_bytes: u64, available_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(available_bytes);
        let percent_used = if total_bytes > 0 {
            (used_bytes as f32 / total_bytes as f32) * 100.0
        } else {
            0.0
        };

        Self {
            total_mb: total_bytes / (1024 * 1024),
            used_mb: used_bytes / (1024 * 1024),
            percent_used,
        }
    }
}

/// Configured address, else the primary local IP, else loopback
pub fn resolve_node_ip(configured: Option<&str>) -> String {
    if let Some(ip) = configured.map(str::trim).filter(|ip| !ip.is_empty()) {
        return ip.to_string();
    }
    match local_ip_address::local_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            warn!("Failed to get IP: {}", e);
            "127.0.0.1".to_string()
        }
    }
}

/// Address announced in heartbeats: the node IP with the port the API listens
/// on, so relays reach agents that do not use the coordinator's default port.
/// An address that already names a port is kept.
pub fn advertised_address(ip: &str, listen: &str) -> String {
    if ip.parse::<SocketAddr>().is_ok() {
        return ip.to_string();
    }
    let port = match listen.parse::<SocketAddr>() {
        Ok(addr) => addr.port(),
        Err(_) => match listen.rsplit_once(':').and_then(|(_, port)| port.parse::<u16>().ok()) {
            Some(port) => port,
            None => return ip.to_string(),
        },
    };
    match ip.parse::<IpAddr>() {
        Ok(addr) => SocketAddr::new(addr, port).to_string(),
        Err(_) => format!("{ip}:{port}"),
    }
}
