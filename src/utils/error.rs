use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Selector config unreadable: {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction error: {message}")]
    Extraction { message: String },

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Reference document missing or unreadable: {path}: {reason}")]
    DriftBaselineMissing { path: PathBuf, reason: String },

    #[error("Persist error: {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Persist {
            path: path.into(),
            source,
        }
    }
}

/// Failures reported by a [`crate::fetch::Fetcher`]. The pipeline treats
/// every variant as a per-item failure.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status} for {identity}")]
    Status { identity: String, status: u16 },

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("no snapshot for {identity}")]
    NotFound { identity: String },

    #[error("invalid identity '{identity}': {reason}")]
    InvalidIdentity { identity: String, reason: String },
}

pub type Result<T> = std::result::Result<T, AppError>;
