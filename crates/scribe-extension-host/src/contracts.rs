//! Contracts for the host services the runtime collaborates with.
//!
//! The orchestrator never talks to the loading primitive, the trust store,
//! the user or the archive format directly; it goes through these traits so
//! the surrounding application (and the tests) can supply its own
//! implementations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use scribe_extension_sdk::{ExtensionInstance, ExtensionManifest, Permissions};

use crate::error::Result;
use crate::types::{ExtensionMetadata, TrustLevel};

/// What the loader produced for one extension. Any entry in `errors`
/// aborts the load: the messages land on the metadata and the extension
/// transitions to Failed.
pub struct LoadOutcome {
    pub instance: Arc<dyn ExtensionInstance>,
    pub errors: Vec<String>,
}

/// Discovers extensions on disk and turns metadata into live instances.
///
/// Each loaded instance lives inside its own isolation boundary; `unload`
/// must release every resource that boundary owns.
#[async_trait]
pub trait ExtensionLoader: Send + Sync {
    /// Scans one root directory (one subdirectory per extension) and
    /// returns metadata for every parseable extension found.
    async fn discover(&self, root: &Path) -> Result<Vec<ExtensionMetadata>>;

    /// Instantiates the extension described by `metadata`.
    async fn load(&self, metadata: &ExtensionMetadata) -> Result<LoadOutcome>;

    /// Tears down the named extension's isolation boundary.
    async fn unload(&self, name: &str) -> Result<()>;

    /// Releases the isolation subsystem globally. Called once at dispose.
    async fn unload_all(&self) -> Result<()>;

    /// Parses a manifest file, returning `None` when the file is absent or
    /// unreadable.
    fn parse_manifest(&self, path: &Path) -> Option<ExtensionManifest>;
}

/// Persisted trust decisions and permission grants, keyed by extension
/// name.
#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn trust_level(&self, name: &str) -> Option<TrustLevel>;
    async fn set_trust_level(&self, name: &str, level: TrustLevel) -> Result<()>;

    async fn granted_permissions(&self, name: &str) -> Option<Permissions>;
    async fn set_granted_permissions(&self, name: &str, permissions: Permissions) -> Result<()>;

    /// Forgets everything recorded for `name`. Called on uninstall.
    async fn remove_entry(&self, name: &str) -> Result<()>;
}

/// Outcome of the initial permission prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptDecision {
    pub approved: bool,
    /// The subset the user actually granted; meaningful only when approved.
    pub granted: Permissions,
}

/// Interactive permission decisions. Implementations talk to the user; both
/// calls are suspension points of unbounded duration.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// Asks the user to approve an extension's manifest-requested
    /// permissions before its first load.
    async fn prompt_initial(&self, metadata: &ExtensionMetadata) -> PromptDecision;

    /// Asks the user for one additional permission at runtime.
    async fn prompt_runtime(&self, metadata: &ExtensionMetadata, permission: Permissions) -> bool;
}

/// Outcome of unpacking an extension package.
#[derive(Debug, Clone)]
pub struct UnpackOutcome {
    pub success: bool,
    pub manifest: Option<ExtensionManifest>,
    pub error: Option<String>,
}

/// Extracts a single-file extension package into the user root.
#[async_trait]
pub trait PackageUnpacker: Send + Sync {
    async fn unpack(&self, package: &Path, destination_root: &Path) -> UnpackOutcome;
}

/// Minimal key/value persistence for host settings, string blobs by key.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory trust store. Suits tests and hosts that do not persist trust
/// across runs.
#[derive(Default)]
pub struct MemoryTrustStore {
    inner: tokio::sync::RwLock<HashMap<String, (Option<TrustLevel>, Option<Permissions>)>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn trust_level(&self, name: &str) -> Option<TrustLevel> {
        self.inner.read().await.get(name).and_then(|e| e.0)
    }

    async fn set_trust_level(&self, name: &str, level: TrustLevel) -> Result<()> {
        self.inner
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .0 = Some(level);
        Ok(())
    }

    async fn granted_permissions(&self, name: &str) -> Option<Permissions> {
        self.inner.read().await.get(name).and_then(|e| e.1)
    }

    async fn set_granted_permissions(&self, name: &str, permissions: Permissions) -> Result<()> {
        self.inner
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .1 = Some(permissions);
        Ok(())
    }

    async fn remove_entry(&self, name: &str) -> Result<()> {
        self.inner.write().await.remove(name);
        Ok(())
    }
}

/// In-memory settings store with the same test-oriented role.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: tokio::sync::RwLock<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
