//! Error types for conda-env-manager

use thiserror::Error;

/// Errors that can occur while driving the conda binary
#[derive(Error, Debug)]
pub enum CondaError {
    /// Conda binary not found
    #[error("conda is not installed or not in PATH")]
    CondaNotFound,

    /// Conda command exited non-zero
    #[error("conda command failed: {0}")]
    CommandFailed(String),

    /// Conda command exceeded its timeout
    #[error("conda command timed out after {0} seconds")]
    Timeout(u64),

    /// Environment not found
    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    /// Manifest could not be rendered or written
    #[error("manifest error: {0}")]
    Manifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CondaError>;
