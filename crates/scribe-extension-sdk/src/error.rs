//! Extension-side error type.

use thiserror::Error;

/// Errors raised by extension code: lifecycle hooks, API handlers and
/// contribution callbacks.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Failed to parse extension manifest: {0}")]
    Manifest(String),

    #[error("Service container error: {0}")]
    Services(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type for extension operations.
pub type Result<T> = std::result::Result<T, ExtensionError>;
