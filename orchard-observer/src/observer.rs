//! Reads monitor output line by line and feeds the event log

use crate::classifier::{classify, EventKind, FailoverEvent};
use crate::error::{ObserverError, Result};
use crate::event_log::EventLog;
use chrono::Local;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

pub const STATUS_MARKER_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub lines: u64,
    pub events: u64,
    pub failovers: u64,
}

pub struct Observer {
    log: EventLog,
    summary: RunSummary,
}

impl Observer {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            summary: RunSummary::default(),
        }
    }

    /// Blank lines are ignored; everything else reaches the raw trace
    pub async fn process_line(&mut self, line: &str) -> Result<Option<FailoverEvent>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let now = Local::now();
        self.summary.lines += 1;
        self.log.record_raw(now, line).await?;
        debug!("{}", line);

        let event = classify(line, now);
        if self.log.record_event(&event).await? {
            self.summary.events += 1;
            if event.event_kind == EventKind::Failover {
                self.summary.failovers += 1;
                warn!("🚨 Failover detected: {}", line);
            } else {
                info!(kind = ?event.event_kind, signal = ?event.signal_strength, "{}", line);
            }
        }
        Ok(Some(event))
    }

    /// Consumes `reader` until EOF, dropping a status marker every `status_every`.
    /// Bytes that are not UTF-8 are replaced rather than ending the run.
    pub async fn run<R>(mut self, mut reader: R, status_every: Duration) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        // kept across iterations so a line cut by a status tick is resumed
        let mut buf = Vec::new();
        let mut status = interval_at(Instant::now() + status_every, status_every);

        loop {
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => {
                    let n = read.map_err(ObserverError::Read)?;
                    if n == 0 && buf.is_empty() {
                        break;
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();
                    self.process_line(&line).await?;
                    if n == 0 {
                        break;
                    }
                }
                _ = status.tick() => {
                    self.log.record_status_marker(Local::now()).await?;
                    debug!("Status marker written");
                }
            }
        }

        info!(
            "Input closed after {} lines, {} events, {} failovers",
            self.summary.lines, self.summary.events, self.summary.failovers
        );
        Ok(self.summary)
    }
}
