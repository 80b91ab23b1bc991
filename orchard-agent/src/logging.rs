//! Log output of the agent
//!
//! Console output always; an optional plain-text mirror in a file that the
//! logs endpoint reads back. The level switches between INFO and DEBUG at
//! runtime through `debug_mode`.

use anyhow::Context;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, reload, Registry};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("No log file configured")]
    NotConfigured,
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct LogControl {
    level: Option<reload::Handle<LevelFilter, Registry>>,
    log_file: Option<PathBuf>,
}

fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Installs the global subscriber; call once from main
pub fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<LogControl> {
    let (filter, handle) = reload::Layer::new(level_for(debug));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(LogControl {
        level: Some(handle),
        log_file: log_file.map(Path::to_path_buf),
    })
}

impl LogControl {
    /// Without a subscriber behind it, level switches are no-ops
    #[cfg(test)]
    pub fn file_only(log_file: Option<PathBuf>) -> Self {
        Self { level: None, log_file }
    }

    pub fn set_debug(&self, debug: bool) {
        if let Some(handle) = &self.level {
            if let Err(e) = handle.modify(|level| *level = level_for(debug)) {
                warn!("Failed to switch log level: {}", e);
            }
        }
    }

    /// Last `lines` lines of the log file
    pub async fn tail(&self, lines: usize) -> Result<Vec<String>, LogError> {
        let path = self.log_file.as_ref().ok_or(LogError::NotConfigured)?;
        let content = tokio::fs::read_to_string(path).await.map_err(|source| LogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(last_lines(&content, lines))
    }
}

fn last_lines(content: &str, lines: usize) -> Vec<String> {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].iter().map(|l| l.trim().to_string()).collect()
}
