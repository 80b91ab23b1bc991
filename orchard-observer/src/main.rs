//! orchard-observer - failover observer for the orchard access points
//!
//! Reads radio monitor output (a serial capture, a file, or stdin), classifies
//! every line and keeps an append-only record of access point events.
//! It never talks to the coordinator.

mod classifier;
mod error;
mod event_log;
mod observer;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use event_log::EventLog;
use observer::{Observer, STATUS_MARKER_INTERVAL};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "orchard-observer", version, about = "Failover observer for orchard access points")]
struct Cli {
    /// Monitor output to read; stdin when omitted
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Directory receiving the raw, events and failover files
    #[arg(short, long, default_value = "observer_logs", value_name = "DIR")]
    log_dir: PathBuf,

    /// Seconds between status markers in the raw trace
    #[arg(long, default_value_t = STATUS_MARKER_INTERVAL.as_secs(), value_name = "SECS")]
    status_interval: u64,
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

async fn open_input(input: Option<&PathBuf>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    let log = EventLog::create(&cli.log_dir, Local::now())
        .await
        .context("Failed to prepare log files")?;
    info!("🔍 Orchard failover observer");
    info!("Raw trace: {}", log.raw_path().display());
    info!("Events: {}", log.events_path().display());
    info!("Failovers: {}", log.failover_path().display());

    let reader = open_input(cli.input.as_ref()).await?;
    let status_every = Duration::from_secs(cli.status_interval.max(1));

    let summary = Observer::new(log)
        .run(reader, status_every)
        .await
        .context("Observer stopped")?;

    info!(
        lines = summary.lines,
        events = summary.events,
        failovers = summary.failovers,
        "✅ Monitoring finished"
    );
    Ok(())
}
