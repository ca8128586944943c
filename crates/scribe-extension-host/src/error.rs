//! Host-side error taxonomy.

use thiserror::Error;

/// Errors produced by the extension runtime.
///
/// Public lifecycle entry points never panic; every failure surfaces as one
/// of these variants, and lifecycle failures are additionally recorded on
/// the extension's metadata (`load_errors`, state `Failed`) so the
/// extension stays diagnosable in listings.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Extension already exists: {0}")]
    AlreadyExists(String),

    #[error("Missing dependency: {dependent} requires {dependency} ({range})")]
    MissingDependency {
        dependent: String,
        dependency: String,
        range: String,
    },

    #[error("Circular dependency involving '{0}'")]
    CircularDependency(String),

    #[error(
        "Incompatible version: {extension} requires {dependency} {required} but {installed} is installed"
    )]
    VersionIncompatible {
        extension: String,
        dependency: String,
        required: String,
        installed: String,
    },

    #[error("Compilation failed for {extension}: {summary}")]
    CompilationFailed { extension: String, summary: String },

    #[error("Artifact validation failed for {extension}: {reason}")]
    ArtifactValidationFailed { extension: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No handler registered for {extension}/{endpoint}")]
    HandlerNotFound { extension: String, endpoint: String },

    #[error("No loaded instance for extension: {0}")]
    InstanceNotFound(String),

    #[error("Extension {extension} does not implement the {capability} capability")]
    CapabilityNotImplemented {
        extension: String,
        capability: &'static str,
    },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Load failed for {extension}: {reason}")]
    LoadFailed { extension: String, reason: String },

    #[error("Extension error: {0}")]
    Extension(#[from] scribe_extension_sdk::ExtensionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
