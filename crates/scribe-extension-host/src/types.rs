//! Runtime records for registered and loaded extensions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use scribe_extension_sdk::{ExtensionContext, ExtensionInstance, ExtensionManifest, Permissions};

/// Lifecycle state of a registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Enabled,
    Disabled,
    Failed,
    Unloading,
    /// Terminal; the metadata entry is removed right after this is emitted.
    Uninstalled,
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "Unloaded"),
            Self::Loading => write!(f, "Loading"),
            Self::Loaded => write!(f, "Loaded"),
            Self::Enabled => write!(f, "Enabled"),
            Self::Disabled => write!(f, "Disabled"),
            Self::Failed => write!(f, "Failed"),
            Self::Unloading => write!(f, "Unloading"),
            Self::Uninstalled => write!(f, "Uninstalled"),
        }
    }
}

/// Coarse trust classification governing default permission behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Bundled with the host; implicitly fully trusted.
    Development,
    Trusted,
    #[default]
    Untrusted,
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "Development"),
            Self::Trusted => write!(f, "Trusted"),
            Self::Untrusted => write!(f, "Untrusted"),
        }
    }
}

/// How the extension's code unit is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Ships source; compiled on demand into the per-user cache.
    SourceBased,
    /// Ships (or has been compiled into) a prebuilt module.
    CompiledModule,
}

impl LoadMode {
    /// Classifies an install directory: a prebuilt module at the top level
    /// means compiled, anything else is treated as source-based.
    pub fn detect(install_path: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(install_path) else {
            return Self::SourceBased;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if matches!(ext, Some("so") | Some("dylib") | Some("dll") | Some("wasm")) {
                return Self::CompiledModule;
            }
        }
        Self::SourceBased
    }
}

/// One registered extension: its manifest plus mutable runtime fields.
///
/// Created at discovery time (one per on-disk extension directory, first
/// seen wins) and removed from the registry only on uninstall.
#[derive(Debug, Clone)]
pub struct ExtensionMetadata {
    pub manifest: ExtensionManifest,
    pub state: ExtensionState,
    pub trust_level: TrustLevel,
    pub granted_permissions: Permissions,
    pub is_enabled: bool,
    /// Accumulated load errors; cleared at the start of each load attempt.
    pub load_errors: Vec<String>,
    pub last_loaded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub load_mode: LoadMode,
    pub install_path: PathBuf,
    /// Whether the extension came from the bundled root.
    pub bundled: bool,
}

impl ExtensionMetadata {
    pub fn new(manifest: ExtensionManifest, install_path: PathBuf, bundled: bool) -> Self {
        let load_mode = LoadMode::detect(&install_path);
        Self {
            manifest,
            state: ExtensionState::Unloaded,
            trust_level: if bundled {
                TrustLevel::Development
            } else {
                TrustLevel::Untrusted
            },
            granted_permissions: Permissions::empty(),
            is_enabled: true,
            load_errors: Vec::new(),
            last_loaded_at: None,
            load_mode,
            install_path,
            bundled,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

/// A live extension: runtime record plus the opaque instance and the context
/// handle that was passed to it.
#[derive(Clone)]
pub struct LoadedExtension {
    pub name: String,
    pub instance: Arc<dyn ExtensionInstance>,
    pub context: Arc<ExtensionContext>,
}

impl std::fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("name", &self.name)
            .finish()
    }
}

/// Notification emitted whenever the orchestrator transitions an extension's
/// state.
#[derive(Debug, Clone)]
pub struct ExtensionStateChange {
    pub name: String,
    pub old_state: ExtensionState,
    pub new_state: ExtensionState,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// A dependency that is not present in the known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub dependent: String,
    pub dependency: String,
    pub required_range: String,
}

/// Outcome of a dependency resolution pass.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolutionResult {
    /// Safe load order: every dependency precedes its dependents.
    pub load_order: Vec<String>,
    pub errors: Vec<String>,
    pub missing_dependencies: Vec<MissingDependency>,
    pub circular_dependencies: Vec<String>,
}

impl DependencyResolutionResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
