// src/error.rs
//
// Domain errors with an explicit contract. Job and I/O boundaries wrap these
// in anyhow with context; callers that need to branch on the condition
// (degenerate geometry, bad settings) match on these enums directly.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("grid transform is not invertible (determinant {determinant:e})")]
    NotInvertible { determinant: f64 },
    #[error("invalid grid shape {cols}x{rows}: both dimensions must be at least 1")]
    InvalidShape { cols: u32, rows: u32 },
    #[error("invalid video size {width}x{height}")]
    InvalidVideoSize { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings bundle {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type GridResult<T> = Result<T, GridError>;
