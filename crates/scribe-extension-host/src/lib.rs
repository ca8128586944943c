//! Scribe extension runtime.
//!
//! Host-side machinery for managed extensions:
//! - Discovery from bundled and per-user roots, manifest-driven
//! - Dependency resolution with cycle, missing and version reporting
//! - On-demand compilation of source-based extensions with a per-user cache
//! - Trust levels and permission grants, persisted across runs
//! - Permissioned API endpoint routing between extensions and host
//! - The full load/unload/enable/disable/install/uninstall lifecycle
//!
//! The runtime owns its registries; code loading, trust persistence, user
//! prompts, package unpacking and settings are reached through the
//! [`contracts`] traits supplied by the embedding application.

pub mod compiler;
pub mod config;
pub mod contracts;
pub mod error;
pub mod manager;
pub mod resolver;
pub mod router;
pub mod settings;
pub mod types;
pub mod ui;

pub use compiler::{
    CargoBackend, CompilationResult, CompileRequest, CompilerBackend, Diagnostic,
    DiagnosticSeverity, EmittedArtifact, ExtensionCompiler,
};
pub use config::HostConfig;
pub use contracts::{
    ExtensionLoader, LoadOutcome, MemorySettingsStore, MemoryTrustStore, PackageUnpacker,
    PermissionPrompt, PromptDecision, SettingsStore, TrustStore, UnpackOutcome,
};
pub use error::{HostError, Result};
pub use manager::ExtensionManager;
pub use resolver::DependencyResolver;
pub use router::{ApiCallResult, ApiRouter, RegisteredApiHandler};
pub use settings::{EnabledFlags, ENABLED_FLAGS_KEY};
pub use types::{
    DependencyResolutionResult, ExtensionMetadata, ExtensionState, ExtensionStateChange, LoadMode,
    LoadedExtension, MissingDependency, TrustLevel,
};
pub use ui::UiRegistry;

/// Commonly used host and SDK types in one import.
pub mod prelude {
    pub use crate::config::HostConfig;
    pub use crate::contracts::{
        ExtensionLoader, LoadOutcome, PackageUnpacker, PermissionPrompt, PromptDecision,
        SettingsStore, TrustStore, UnpackOutcome,
    };
    pub use crate::error::HostError;
    pub use crate::manager::ExtensionManager;
    pub use crate::router::ApiCallResult;
    pub use crate::types::{ExtensionMetadata, ExtensionState, ExtensionStateChange, TrustLevel};
    pub use scribe_extension_sdk::prelude::*;
}
