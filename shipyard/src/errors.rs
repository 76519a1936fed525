//! Error types for the deployment pipeline

use thiserror::Error;

/// Main error type for shipyard
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Malformed request, rejected before anything is allocated
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    FetchFailure(String),

    #[error("Build failed: {0}")]
    BuildFailure(String),

    /// The build step succeeded but left no output directory behind
    #[error("Build output missing: {0}")]
    BuildOutputMissing(String),

    #[error("Upload failed: {0}")]
    UploadFailure(String),

    #[error("Timed out during {step} after {secs}s")]
    Timeout { step: String, secs: u64 },

    #[error("Missing required configuration: {}", .0.join(", "))]
    StartupConfigMissing(Vec<String>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Log bus error: {0}")]
    BusError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Executor spawn error: {0}")]
    SpawnError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

impl From<object_store::Error> for PipelineError {
    fn from(err: object_store::Error) -> Self {
        PipelineError::StorageError(err.to_string())
    }
}
