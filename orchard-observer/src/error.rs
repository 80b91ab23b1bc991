use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObserverError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read input: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ObserverError>;
