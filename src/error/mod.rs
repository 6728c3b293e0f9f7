use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Session file persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O failed on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported session schema: {message}")]
    Schema { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while reading graph and manifest artifacts
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected document shape in {}: {message}", path.display())]
    Shape { path: PathBuf, message: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Result type alias for ingest operations
pub type IngestResult<T> = Result<T, IngestError>;
