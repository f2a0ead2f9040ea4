//! Domain-level error taxonomy for envfix.

use std::path::PathBuf;

/// envfix domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvfixError {
    #[error("invalid environment spec: {0}")]
    InvalidSpec(String),

    #[error("invalid dependency entry: {0}")]
    InvalidDependency(String),

    #[error("project root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("manifest parse error at line {line}: {reason}")]
    ManifestParse { line: usize, reason: String },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for envfix domain operations.
pub type Result<T> = std::result::Result<T, EnvfixError>;
