//! Append-only output files of one observer run
//!
//! - `raw_<ts>.log`: every non-empty line as `<timestamp> | <line>`, plus status markers
//! - `events_<ts>.jsonl`: one JSON record per significant event
//! - `failover_<ts>.log`: one block per failover

use crate::classifier::{EventKind, FailoverEvent};
use crate::error::{ObserverError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

const FILE_STAMP: &str = "%Y%m%d_%H%M%S";
const SEPARATOR_WIDTH: usize = 50;

struct AppendFile {
    path: PathBuf,
    file: File,
}

impl AppendFile {
    async fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| ObserverError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file })
    }

    async fn append(&mut self, text: &str) -> Result<()> {
        let written = async {
            self.file.write_all(text.as_bytes()).await?;
            self.file.flush().await
        }
        .await;
        written.map_err(|source| ObserverError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub struct EventLog {
    raw: AppendFile,
    events: AppendFile,
    failover: AppendFile,
}

impl EventLog {
    /// Creates the directory and the three files named after `started`
    pub async fn create(dir: &Path, started: DateTime<Local>) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| ObserverError::Open {
                path: dir.to_path_buf(),
                source,
            })?;

        let stamp = started.format(FILE_STAMP);
        Ok(Self {
            raw: AppendFile::open(dir.join(format!("raw_{stamp}.log"))).await?,
            events: AppendFile::open(dir.join(format!("events_{stamp}.jsonl"))).await?,
            failover: AppendFile::open(dir.join(format!("failover_{stamp}.log"))).await?,
        })
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw.path
    }

    pub fn events_path(&self) -> &Path {
        &self.events.path
    }

    pub fn failover_path(&self) -> &Path {
        &self.failover.path
    }

    pub async fn record_raw(&mut self, timestamp: DateTime<Local>, line: &str) -> Result<()> {
        self.raw
            .append(&format!("{} | {}\n", timestamp.to_rfc3339(), line))
            .await
    }

    pub async fn record_status_marker(&mut self, timestamp: DateTime<Local>) -> Result<()> {
        self.record_raw(timestamp, "STATUS_CHECK: monitor still active").await
    }

    /// Appends significant events; returns whether anything was written
    pub async fn record_event(&mut self, event: &FailoverEvent) -> Result<bool> {
        if !event.is_significant() {
            return Ok(false);
        }

        let mut record = serde_json::to_string(event)?;
        record.push('\n');
        self.events.append(&record).await?;

        if event.event_kind == EventKind::Failover {
            let block = format!(
                "{} | FAILOVER EVENT\nDetails: {}\n{}\n",
                event.timestamp.to_rfc3339(),
                event.raw_text,
                "-".repeat(SEPARATOR_WIDTH)
            );
            self.failover.append(&block).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;

    #[tokio::test]
    async fn test_files_named_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local::now();
        let log = EventLog::create(&dir.path().join("logs"), started).await.unwrap();

        let stamp = started.format(FILE_STAMP).to_string();
        assert!(log.raw_path().ends_with(format!("raw_{stamp}.log")));
        assert!(log.events_path().ends_with(format!("events_{stamp}.jsonl")));
        assert!(log.failover_path().ends_with(format!("failover_{stamp}.log")));
        assert!(log.raw_path().exists());
    }

    #[tokio::test]
    async fn test_only_significant_events_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::create(dir.path(), Local::now()).await.unwrap();

        let unknown = classify("Scanning channels...", Local::now());
        assert!(!log.record_event(&unknown).await.unwrap());

        let offline = classify("Primary AP: offline", Local::now());
        assert!(log.record_event(&offline).await.unwrap());

        let content = std::fs::read_to_string(log.events_path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["event_kind"], "primary_ap_offline");
        assert_eq!(record["raw_text"], "Primary AP: offline");

        let failovers = std::fs::read_to_string(log.failover_path()).unwrap();
        assert!(failovers.is_empty());
    }

    #[tokio::test]
    async fn test_failover_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::create(dir.path(), Local::now()).await.unwrap();

        let event = classify("FAILOVER DETECTED: switching to backup", Local::now());
        log.record_event(&event).await.unwrap();

        let block = std::fs::read_to_string(log.failover_path()).unwrap();
        let lines: Vec<_> = block.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" | FAILOVER EVENT"));
        assert_eq!(lines[1], "Details: FAILOVER DETECTED: switching to backup");
        assert_eq!(lines[2], "-".repeat(SEPARATOR_WIDTH));
    }

    #[tokio::test]
    async fn test_raw_trace_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::create(dir.path(), Local::now()).await.unwrap();

        log.record_raw(Local::now(), "Signal: -67dBm").await.unwrap();
        log.record_status_marker(Local::now()).await.unwrap();

        let raw = std::fs::read_to_string(log.raw_path()).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" | Signal: -67dBm"));
        assert!(lines[1].ends_with(" | STATUS_CHECK: monitor still active"));
    }
}
