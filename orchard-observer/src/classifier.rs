//! Line classifier for radio monitor output
//!
//! Each line is judged on its own, first match wins:
//! failover marker, then primary AP status, then backup AP status, then
//! network presence. Signal strength and BSSID are pulled out whenever
//! present, whatever the kind.

use chrono::{DateTime, Local};
use serde::Serialize;

const FAILOVER_MARKER: &str = "FAILOVER DETECTED";
const PRIMARY_AP: &str = "Primary AP";
const BACKUP_AP: &str = "Backup AP";
const NETWORK_FOUND: &str = "Apple network found";
const NETWORK_LOST: &str = "No Apple networks found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Failover,
    PrimaryApOnline,
    PrimaryApOffline,
    BackupApOnline,
    BackupApOffline,
    AppleNetworkDetected,
    AppleNetworkLost,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApStatus {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverEvent {
    pub timestamp: DateTime<Local>,
    pub event_kind: EventKind,
    pub primary_ap_status: ApStatus,
    pub backup_ap_status: ApStatus,
    pub ap_hardware_id: Option<String>,
    pub signal_strength: Option<i32>,
    pub failover_detected: bool,
    pub raw_text: String,
}

impl FailoverEvent {
    /// Unknown lines only go to the raw trace
    pub fn is_significant(&self) -> bool {
        self.event_kind != EventKind::Unknown
    }
}

/// Online/offline phrase of an AP status line
fn ap_status(line: &str) -> ApStatus {
    let lower = line.to_lowercase();
    if lower.contains("online") {
        ApStatus::Online
    } else if lower.contains("offline") {
        ApStatus::Offline
    } else {
        ApStatus::Unknown
    }
}

pub fn classify(line: &str, timestamp: DateTime<Local>) -> FailoverEvent {
    let mut primary_ap_status = ApStatus::Unknown;
    let mut backup_ap_status = ApStatus::Unknown;

    let event_kind = if line.contains(FAILOVER_MARKER) {
        EventKind::Failover
    } else if line.contains(PRIMARY_AP) {
        primary_ap_status = ap_status(line);
        match primary_ap_status {
            ApStatus::Online => EventKind::PrimaryApOnline,
            ApStatus::Offline => EventKind::PrimaryApOffline,
            ApStatus::Unknown => EventKind::Unknown,
        }
    } else if line.contains(BACKUP_AP) {
        backup_ap_status = ap_status(line);
        match backup_ap_status {
            ApStatus::Online => EventKind::BackupApOnline,
            ApStatus::Offline => EventKind::BackupApOffline,
            ApStatus::Unknown => EventKind::Unknown,
        }
    } else if line.contains(NETWORK_FOUND) {
        EventKind::AppleNetworkDetected
    } else if line.contains(NETWORK_LOST) {
        EventKind::AppleNetworkLost
    } else {
        EventKind::Unknown
    };

    FailoverEvent {
        timestamp,
        event_kind,
        primary_ap_status,
        backup_ap_status,
        ap_hardware_id: extract_bssid(line),
        signal_strength: extract_signal(line),
        failover_detected: event_kind == EventKind::Failover,
        raw_text: line.to_string(),
    }
}

/// `Signal: -67dBm` -> -67; malformed numbers are dropped
fn extract_signal(line: &str) -> Option<i32> {
    let (_, rest) = line.split_once("Signal:")?;
    let (number, _) = rest.split_once("dBm")?;
    number.trim().parse().ok()
}

/// Everything after `BSSID:`, trimmed
fn extract_bssid(line: &str) -> Option<String> {
    let (_, rest) = line.split_once("BSSID:")?;
    let bssid = rest.trim();
    (!bssid.is_empty()).then(|| bssid.to_string())
}
