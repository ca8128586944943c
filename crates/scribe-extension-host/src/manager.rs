//! The lifecycle orchestrator.
//!
//! Coordinates discovery, dependency resolution, compilation, permission
//! resolution and the load/unload/enable/disable/install/uninstall flows.
//! All shared registries live behind async locks; lifecycle operations on
//! the same extension name are additionally serialized through a keyed
//! mutex, so independent extensions can progress concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use scribe_extension_sdk::{
    ApiCaller, ExtensionContext, ExtensionError, ExtensionManifest, Permissions, Result as SdkResult,
    RuntimePermissions, ServiceContainer, UiElement, UiElementKind, UiRegistrar,
    MANIFEST_FILE_NAME,
};

use crate::compiler::{CargoBackend, CompilerBackend, ExtensionCompiler};
use crate::config::HostConfig;
use crate::contracts::{
    ExtensionLoader, PackageUnpacker, PermissionPrompt, SettingsStore, TrustStore,
};
use crate::error::{HostError, Result};
use crate::resolver::DependencyResolver;
use crate::router::{ApiCallResult, ApiRouter};
use crate::settings::EnabledFlags;
use crate::types::{
    ExtensionMetadata, ExtensionState, ExtensionStateChange, LoadMode, LoadedExtension, TrustLevel,
};
use crate::ui::UiRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-extension-name serialization of lifecycle operations.
#[derive(Default)]
struct KeyedLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, name: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(map.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Top-level extension runtime.
///
/// Owns the metadata registry, the loaded-instance map, the router, the
/// compiler and the persisted enabled flags; everything else (code loading,
/// trust persistence, user prompts, package unpacking, settings) is reached
/// through the collaborator contracts.
pub struct ExtensionManager {
    config: HostConfig,
    metadata: Arc<RwLock<HashMap<String, ExtensionMetadata>>>,
    loaded: Arc<RwLock<HashMap<String, LoadedExtension>>>,
    router: Arc<ApiRouter>,
    resolver: DependencyResolver,
    compiler: ExtensionCompiler,
    loader: Arc<dyn ExtensionLoader>,
    trust: Arc<dyn TrustStore>,
    prompt: Arc<dyn PermissionPrompt>,
    unpacker: Arc<dyn PackageUnpacker>,
    enabled_flags: EnabledFlags,
    ui: Arc<UiRegistry>,
    host_services: ServiceContainer,
    events: broadcast::Sender<ExtensionStateChange>,
    locks: KeyedLocks,
}

impl ExtensionManager {
    pub fn new(
        config: HostConfig,
        loader: Arc<dyn ExtensionLoader>,
        trust: Arc<dyn TrustStore>,
        prompt: Arc<dyn PermissionPrompt>,
        unpacker: Arc<dyn PackageUnpacker>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let metadata = Arc::new(RwLock::new(HashMap::new()));
        let loaded = Arc::new(RwLock::new(HashMap::new()));
        let router = Arc::new(ApiRouter::new(Arc::clone(&metadata), Arc::clone(&loaded)));
        let compiler = ExtensionCompiler::new(config.cache_dir.clone(), Arc::new(CargoBackend::new()))
            .with_library_paths(config.library_paths.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            metadata,
            loaded,
            router,
            resolver: DependencyResolver::new(),
            compiler,
            loader,
            trust,
            prompt,
            unpacker,
            enabled_flags: EnabledFlags::new(settings),
            ui: Arc::new(UiRegistry::new()),
            host_services: ServiceContainer::new(),
            events,
            locks: KeyedLocks::default(),
        }
    }

    /// Replaces the compilation backend. Intended for hosts with their own
    /// toolchain and for tests.
    pub fn with_compiler_backend(mut self, backend: Arc<dyn CompilerBackend>) -> Self {
        self.compiler = ExtensionCompiler::new(self.config.cache_dir.clone(), backend)
            .with_library_paths(self.config.library_paths.clone());
        self
    }

    /// Adds one host service to the allow-list seeded into every
    /// extension's child container. Must be called before `initialize`.
    pub fn register_host_service<T: std::any::Any + Send + Sync>(
        &mut self,
        service: Arc<T>,
    ) -> Result<()> {
        self.host_services.register(service)?;
        Ok(())
    }

    /// Subscribes to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionStateChange> {
        self.events.subscribe()
    }

    pub fn router(&self) -> &Arc<ApiRouter> {
        &self.router
    }

    pub fn ui_registry(&self) -> &Arc<UiRegistry> {
        &self.ui
    }

    /// Dispatches an endpoint call on behalf of an external caller.
    pub async fn call_api(&self, extension: &str, endpoint: &str, params: Value) -> ApiCallResult {
        self.router.call(extension, endpoint, params).await
    }

    /// Discovers both roots and loads every enabled extension in dependency
    /// order. Resolution errors are logged and the load proceeds
    /// best-effort for the extensions that did resolve.
    pub async fn initialize(&self) -> Result<()> {
        info!(
            bundled_root = %self.config.bundled_root.display(),
            user_root = %self.config.user_root.display(),
            "initializing extension runtime"
        );
        self.discover_root(&self.config.bundled_root, true).await?;
        self.discover_root(&self.config.user_root, false).await?;

        let manifests: Vec<ExtensionManifest> = {
            let map = self.metadata.read().await;
            map.values()
                .filter(|m| m.is_enabled && m.state == ExtensionState::Unloaded)
                .map(|m| m.manifest.clone())
                .collect()
        };
        let resolution = self.resolver.resolve(&manifests);
        for err in &resolution.errors {
            warn!(error = %err, "dependency resolution");
        }

        for name in &resolution.load_order {
            if let Err(e) = self.load(name).await {
                warn!(extension_id = %name, error = %e, "startup load failed");
            }
        }
        Ok(())
    }

    /// Loads one extension, on-demand loading its dependencies first.
    /// Idempotent: loading an already-loaded extension succeeds without
    /// doing anything.
    pub async fn load(&self, name: &str) -> Result<()> {
        self.load_chained(name.to_string(), Vec::new()).await
    }

    fn load_chained(&self, name: String, chain: Vec<String>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.loaded.read().await.contains_key(&name) {
                return Ok(());
            }
            // Checked before taking the keyed lock: a cyclic chain would
            // otherwise deadlock on its own root.
            if chain.contains(&name) {
                self.append_error(&name, format!("Circular dependency detected involving '{name}'"))
                    .await;
                self.set_state(&name, ExtensionState::Failed).await;
                return Err(HostError::CircularDependency(name));
            }
            let _guard = self.locks.acquire(&name).await;
            if self.loaded.read().await.contains_key(&name) {
                return Ok(());
            }
            self.load_locked(&name, &chain).await
        })
    }

    async fn load_locked(&self, name: &str, chain: &[String]) -> Result<()> {
        let Some(snapshot) = self.get(name).await else {
            return Err(HostError::NotFound(name.to_string()));
        };
        info!(extension_id = %name, version = %snapshot.manifest.version, "loading extension");

        if let Some(meta) = self.metadata.write().await.get_mut(name) {
            meta.load_errors.clear();
        }
        self.set_state(name, ExtensionState::Loading).await;

        // 1. Immediate dependency versions.
        let available: HashMap<String, String> = {
            let map = self.metadata.read().await;
            map.values()
                .map(|m| (m.manifest.name.clone(), m.manifest.version.clone()))
                .collect()
        };
        let mut dependency_failures = Vec::new();
        for (dependency, range) in &snapshot.manifest.dependencies {
            match available.get(dependency) {
                None => dependency_failures.push(HostError::MissingDependency {
                    dependent: name.to_string(),
                    dependency: dependency.clone(),
                    range: range.clone(),
                }),
                Some(installed) if !DependencyResolver::is_version_compatible(installed, range) => {
                    dependency_failures.push(HostError::VersionIncompatible {
                        extension: name.to_string(),
                        dependency: dependency.clone(),
                        required: range.clone(),
                        installed: installed.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        if !dependency_failures.is_empty() {
            for extra in dependency_failures.iter().skip(1) {
                self.append_error(name, extra.to_string()).await;
            }
            return Err(self.fail_load_with(name, dependency_failures.remove(0)).await);
        }

        // 2. Dependencies load first, fully, before this one continues.
        let mut chain = chain.to_vec();
        chain.push(name.to_string());
        for dependency in snapshot.manifest.dependencies.keys() {
            if !self.loaded.read().await.contains_key(dependency) {
                if let Err(e) = self.load_chained(dependency.clone(), chain.clone()).await {
                    return Err(self
                        .fail_load(name, format!("Dependency '{dependency}' failed to load: {e}"))
                        .await);
                }
            }
        }

        // 3. Trust level.
        let trust_level = if snapshot.bundled {
            TrustLevel::Development
        } else {
            self.trust
                .trust_level(name)
                .await
                .unwrap_or(TrustLevel::Untrusted)
        };
        if let Some(meta) = self.metadata.write().await.get_mut(name) {
            meta.trust_level = trust_level;
        }

        // 4. Source-based extensions compile (or reuse a validated cache).
        let entry_point = snapshot.manifest.entry_point.clone();
        if LoadMode::detect(&snapshot.install_path) == LoadMode::SourceBased {
            let cache_usable = !self
                .compiler
                .needs_recompilation(&snapshot.install_path, name)
                && self.compiler.validate_cached(name, &entry_point).is_ok();
            if !cache_usable {
                let result = self
                    .compiler
                    .compile(&snapshot.install_path, name, &entry_point)
                    .await;
                if !result.success {
                    for diagnostic in &result.diagnostics {
                        self.append_error(name, diagnostic.to_string()).await;
                    }
                    let summary = result
                        .error_summary
                        .unwrap_or_else(|| "compilation failed".to_string());
                    return Err(self
                        .fail_load_with(
                            name,
                            HostError::CompilationFailed {
                                extension: name.to_string(),
                                summary,
                            },
                        )
                        .await);
                }
            } else {
                debug!(extension_id = %name, "reusing cached module");
            }
        }
        if let Some(meta) = self.metadata.write().await.get_mut(name) {
            meta.load_mode = LoadMode::CompiledModule;
        }

        // 5. Permission grant.
        let granted = if trust_level == TrustLevel::Development {
            Permissions::FULL_TRUST
        } else if let Some(granted) = self.trust.granted_permissions(name).await {
            granted
        } else {
            let decision = self.prompt.prompt_initial(&snapshot).await;
            if !decision.approved {
                return Err(self
                    .fail_load_with(
                        name,
                        HostError::PermissionDenied(format!(
                            "requested permissions for '{name}' were not approved"
                        )),
                    )
                    .await);
            }
            if let Err(e) = self
                .trust
                .set_granted_permissions(name, decision.granted)
                .await
            {
                warn!(extension_id = %name, error = %e, "permission grant not persisted");
            }
            decision.granted
        };
        if let Some(meta) = self.metadata.write().await.get_mut(name) {
            meta.granted_permissions = granted;
        }

        // 6. Instantiate via the external loader.
        let snapshot = self
            .get(name)
            .await
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        let outcome = match self.loader.load(&snapshot).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return Err(self.fail_load(name, format!("Loader error: {e}")).await);
            }
        };
        if !outcome.errors.is_empty() {
            return Err(self
                .fail_load(name, format!("Loader reported: {}", outcome.errors.join("; ")))
                .await);
        }
        let instance = outcome.instance;

        // 7. Context capability handle bound to this extension.
        let context = Arc::new(ExtensionContext::new(
            name,
            Arc::new(ScopedPermissions {
                name: name.to_string(),
                metadata: Arc::clone(&self.metadata),
                trust: Arc::clone(&self.trust),
                prompt: Arc::clone(&self.prompt),
            }),
            Arc::new(RouterCaller {
                router: Arc::clone(&self.router),
            }),
            Arc::new(ScopedUi {
                name: name.to_string(),
                metadata: Arc::clone(&self.metadata),
                registry: Arc::clone(&self.ui),
            }),
        ));

        // 8. Isolated child service container: context plus the host
        // allow-list, then whatever the extension registers, then sealed.
        if let Some(services) = instance.service_contribution() {
            let attach = (|| -> SdkResult<ServiceContainer> {
                let mut child = ServiceContainer::new();
                child.seed_from(&self.host_services)?;
                child.register(Arc::clone(&context))?;
                services.register_services(&mut child)?;
                child.seal();
                Ok(child)
            })()
            .and_then(|child| context.attach_services(child));
            if let Err(e) = attach {
                return Err(self
                    .fail_load(name, format!("Service registration failed: {e}"))
                    .await);
            }
        }

        // 9. Load hook.
        if let Err(e) = instance.on_load(&context).await {
            return Err(self.fail_load(name, format!("Load hook failed: {e}")).await);
        }

        // 10. UI contribution. Failures here are logged loudly and still
        // abort the load, so broken UI never goes unnoticed.
        if let Some(ui) = instance.ui_contribution() {
            if granted.allows(Permissions::UI) {
                if let Err(e) = ui.register_ui(&context).await {
                    error!(extension_id = %name, error = %e, "ui registration failed");
                    return Err(self
                        .fail_load(name, format!("UI registration failed: {e}"))
                        .await);
                }
            }
        }

        // 11. API contribution.
        if let Some(api) = instance.api_contribution() {
            if granted.allows(Permissions::API_REGISTRATION) {
                for spec in api.endpoints() {
                    self.router.register_endpoint(name, &spec).await;
                }
            }
        }

        // 12. Record and finish.
        let enabled = self.enabled_flags.is_enabled(name).await;
        self.loaded.write().await.insert(
            name.to_string(),
            LoadedExtension {
                name: name.to_string(),
                instance: Arc::clone(&instance),
                context: Arc::clone(&context),
            },
        );
        if let Some(meta) = self.metadata.write().await.get_mut(name) {
            meta.is_enabled = enabled;
            meta.last_loaded_at = Some(Utc::now());
        }
        self.set_state(
            name,
            if enabled {
                ExtensionState::Enabled
            } else {
                ExtensionState::Loaded
            },
        )
        .await;
        if enabled {
            if let Err(e) = instance.on_enable(&context).await {
                return Err(self
                    .fail_load(name, format!("Enable hook failed: {e}"))
                    .await);
            }
        }
        info!(extension_id = %name, enabled, "extension loaded");
        Ok(())
    }

    /// Unloads one extension. Fails when it is not loaded; on a hook or
    /// loader failure the prior state is restored instead of leaving the
    /// extension stuck in `Unloading`.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let _guard = self.locks.acquire(name).await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> Result<()> {
        let Some(ext) = self.loaded.read().await.get(name).cloned() else {
            return Err(HostError::InstanceNotFound(name.to_string()));
        };
        let prior = self
            .get(name)
            .await
            .map(|m| m.state)
            .unwrap_or(ExtensionState::Loaded);
        self.set_state(name, ExtensionState::Unloading).await;

        match self.unload_steps(name, &ext, prior).await {
            Ok(()) => {
                self.set_state(name, ExtensionState::Unloaded).await;
                info!(extension_id = %name, "extension unloaded");
                Ok(())
            }
            Err(e) => {
                warn!(extension_id = %name, error = %e, "unload failed, restoring prior state");
                self.append_error(name, format!("Unload failed: {e}")).await;
                self.set_state(name, prior).await;
                Err(e)
            }
        }
    }

    async fn unload_steps(
        &self,
        name: &str,
        ext: &LoadedExtension,
        prior: ExtensionState,
    ) -> Result<()> {
        if prior == ExtensionState::Enabled {
            ext.instance.on_disable(&ext.context).await?;
        }
        // Host-tracked UI is removed whether or not the extension cleaned
        // up after itself.
        self.ui.remove_extension_elements(name).await;
        self.router.unregister_extension(name).await;
        ext.instance.on_unload(&ext.context).await?;
        ext.context.detach_services();
        self.loader.unload(name).await?;
        self.loaded.write().await.remove(name);
        Ok(())
    }

    /// Enables an extension, loading it first if necessary. Once the name
    /// checks out, the flag is persisted before any hook runs so a crash
    /// mid-way comes back up in the requested configuration.
    pub async fn enable(&self, name: &str) -> Result<()> {
        {
            let mut map = self.metadata.write().await;
            let meta = map
                .get_mut(name)
                .ok_or_else(|| HostError::NotFound(name.to_string()))?;
            meta.is_enabled = true;
        }
        self.enabled_flags.set_enabled(name, true).await?;
        if !self.is_loaded(name).await {
            return self.load(name).await;
        }

        let _guard = self.locks.acquire(name).await;
        let Some(ext) = self.loaded.read().await.get(name).cloned() else {
            return Err(HostError::InstanceNotFound(name.to_string()));
        };
        let granted = self
            .get(name)
            .await
            .map(|m| m.granted_permissions)
            .unwrap_or_else(Permissions::empty);

        // UI contributed only while enabled gets a fresh chance here.
        if let Some(ui) = ext.instance.ui_contribution() {
            if granted.allows(Permissions::UI) {
                if let Err(e) = ui.register_ui(&ext.context).await {
                    error!(extension_id = %name, error = %e, "ui registration failed");
                    return Err(self
                        .fail_load(name, format!("UI registration failed: {e}"))
                        .await);
                }
            }
        }
        if let Err(e) = ext.instance.on_enable(&ext.context).await {
            return Err(self.fail_load(name, format!("Enable hook failed: {e}")).await);
        }
        self.set_state(name, ExtensionState::Enabled).await;
        Ok(())
    }

    /// Disables an extension. A loaded extension stays loaded but stops
    /// receiving API calls.
    pub async fn disable(&self, name: &str) -> Result<()> {
        {
            let mut map = self.metadata.write().await;
            let meta = map
                .get_mut(name)
                .ok_or_else(|| HostError::NotFound(name.to_string()))?;
            meta.is_enabled = false;
        }
        self.enabled_flags.set_enabled(name, false).await?;
        if !self.is_loaded(name).await {
            return Ok(());
        }

        let _guard = self.locks.acquire(name).await;
        let Some(ext) = self.loaded.read().await.get(name).cloned() else {
            return Ok(());
        };
        if let Err(e) = ext.instance.on_disable(&ext.context).await {
            return Err(self
                .fail_load(name, format!("Disable hook failed: {e}"))
                .await);
        }
        self.set_state(name, ExtensionState::Disabled).await;
        Ok(())
    }

    /// Installs from a package file (via the unpacker) or an extension
    /// directory (copied into the user root). Returns the installed name.
    pub async fn install(&self, source: &Path) -> Result<String> {
        if source.is_file() {
            let outcome = self.unpacker.unpack(source, &self.config.user_root).await;
            if !outcome.success {
                return Err(HostError::Other(
                    outcome
                        .error
                        .unwrap_or_else(|| "package unpack failed".to_string()),
                ));
            }
            let name = outcome
                .manifest
                .map(|m| m.name)
                .ok_or_else(|| HostError::InvalidManifest("package carried no manifest".into()))?;
            self.refresh().await?;
            info!(extension_id = %name, "extension installed from package");
            return Ok(name);
        }

        if !source.is_dir() {
            return Err(HostError::Other(format!(
                "install source not found: {}",
                source.display()
            )));
        }
        let manifest = ExtensionManifest::from_file(&source.join(MANIFEST_FILE_NAME))
            .map_err(|e| HostError::InvalidManifest(e.to_string()))?;
        manifest
            .validate()
            .map_err(|e| HostError::InvalidManifest(e.to_string()))?;
        if self.metadata.read().await.contains_key(&manifest.name) {
            return Err(HostError::AlreadyExists(manifest.name));
        }

        let destination = self.config.user_root.join(&manifest.name);
        copy_dir_recursive(source, &destination)?;
        self.refresh().await?;
        info!(extension_id = %manifest.name, "extension installed from directory");
        Ok(manifest.name)
    }

    /// Uninstalls an extension: unload, delete the install directory and
    /// cached artifacts, forget trust and enabled-flag data, then emit the
    /// terminal state.
    pub async fn uninstall(&self, name: &str) -> Result<()> {
        if self.is_loaded(name).await {
            self.unload(name).await?;
        }

        let _guard = self.locks.acquire(name).await;
        let Some(meta) = self.get(name).await else {
            return Err(HostError::NotFound(name.to_string()));
        };
        if meta.install_path.exists() {
            std::fs::remove_dir_all(&meta.install_path)?;
        }
        self.compiler.remove_artifacts(name);
        let old_state = meta.state;
        self.metadata.write().await.remove(name);
        self.trust.remove_entry(name).await?;
        self.enabled_flags.remove(name).await?;
        self.emit(name, old_state, ExtensionState::Uninstalled);
        info!(extension_id = %name, "extension uninstalled");
        Ok(())
    }

    /// Unload then load. Not atomic: a failed load after a successful
    /// unload leaves the extension Unloaded.
    pub async fn reload(&self, name: &str) -> Result<()> {
        self.unload(name).await?;
        self.load(name).await
    }

    /// Re-scans both roots. Only genuinely new names are added; registered
    /// metadata is never overwritten by re-discovery.
    pub async fn refresh(&self) -> Result<()> {
        self.discover_root(&self.config.bundled_root, true).await?;
        self.discover_root(&self.config.user_root, false).await
    }

    /// Best-effort teardown of every loaded extension, then the isolation
    /// subsystem itself.
    pub async fn dispose(&self) {
        let names: Vec<String> = self.loaded.read().await.keys().cloned().collect();
        for name in names {
            let _guard = self.locks.acquire(&name).await;
            if let Err(e) = self.unload_locked(&name).await {
                warn!(extension_id = %name, error = %e, "unload during dispose failed");
            }
        }
        if let Err(e) = self.loader.unload_all().await {
            warn!(error = %e, "loader teardown failed");
        }
    }

    /// All registered extensions, including failed ones with their
    /// accumulated errors.
    pub async fn list(&self) -> Vec<ExtensionMetadata> {
        let mut all: Vec<ExtensionMetadata> = self.metadata.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        all
    }

    pub async fn get(&self, name: &str) -> Option<ExtensionMetadata> {
        self.metadata.read().await.get(name).cloned()
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().await.contains_key(name)
    }

    async fn discover_root(&self, root: &Path, bundled: bool) -> Result<()> {
        if !root.exists() {
            debug!(root = %root.display(), "extension root absent, skipping");
            return Ok(());
        }
        let discovered = self.loader.discover(root).await?;
        for mut meta in discovered {
            {
                let map = self.metadata.read().await;
                // First seen wins; the bundled root is scanned first.
                if map.contains_key(meta.name()) {
                    continue;
                }
            }
            meta.bundled = bundled;
            if bundled {
                meta.trust_level = TrustLevel::Development;
            }
            meta.is_enabled = self.enabled_flags.is_enabled(meta.name()).await;
            debug!(extension_id = %meta.name(), bundled, "extension discovered");
            self.metadata
                .write()
                .await
                .insert(meta.name().to_string(), meta);
        }
        Ok(())
    }

    async fn set_state(&self, name: &str, new_state: ExtensionState) {
        let old_state = {
            let mut map = self.metadata.write().await;
            match map.get_mut(name) {
                Some(meta) => {
                    let old = meta.state;
                    meta.state = new_state;
                    Some(old)
                }
                None => None,
            }
        };
        if let Some(old_state) = old_state {
            self.emit(name, old_state, new_state);
        }
    }

    fn emit(&self, name: &str, old_state: ExtensionState, new_state: ExtensionState) {
        let _ = self.events.send(ExtensionStateChange {
            name: name.to_string(),
            old_state,
            new_state,
            at: Utc::now(),
        });
    }

    async fn append_error(&self, name: &str, message: String) {
        if let Some(meta) = self.metadata.write().await.get_mut(name) {
            meta.load_errors.push(message);
        }
    }

    /// Records a load failure on the metadata, transitions to Failed and
    /// returns the error for the caller to propagate.
    async fn fail_load(&self, name: &str, reason: String) -> HostError {
        warn!(extension_id = %name, %reason, "load failed");
        self.append_error(name, reason.clone()).await;
        self.set_state(name, ExtensionState::Failed).await;
        HostError::LoadFailed {
            extension: name.to_string(),
            reason,
        }
    }

    /// Like `fail_load` but keeps an already-typed error instead of wrapping
    /// it in `LoadFailed`.
    async fn fail_load_with(&self, name: &str, error: HostError) -> HostError {
        warn!(extension_id = %name, error = %error, "load failed");
        self.append_error(name, error.to_string()).await;
        self.set_state(name, ExtensionState::Failed).await;
        error
    }
}

/// Runtime permission bridge bound to one extension.
struct ScopedPermissions {
    name: String,
    metadata: Arc<RwLock<HashMap<String, ExtensionMetadata>>>,
    trust: Arc<dyn TrustStore>,
    prompt: Arc<dyn PermissionPrompt>,
}

#[async_trait::async_trait]
impl RuntimePermissions for ScopedPermissions {
    async fn request(&self, permission: Permissions) -> bool {
        let snapshot = { self.metadata.read().await.get(&self.name).cloned() };
        let Some(meta) = snapshot else {
            return false;
        };
        if meta.granted_permissions.allows(permission) {
            return true;
        }
        if !self.prompt.prompt_runtime(&meta, permission).await {
            return false;
        }
        let updated = meta.granted_permissions | permission;
        if let Some(meta) = self.metadata.write().await.get_mut(&self.name) {
            meta.granted_permissions = updated;
        }
        if let Err(e) = self.trust.set_granted_permissions(&self.name, updated).await {
            warn!(extension_id = %self.name, error = %e, "runtime grant not persisted");
        }
        true
    }
}

/// API-call bridge; the router applies the caller-independent checks.
struct RouterCaller {
    router: Arc<ApiRouter>,
}

#[async_trait::async_trait]
impl ApiCaller for RouterCaller {
    async fn call(&self, extension: &str, endpoint: &str, params: Value) -> SdkResult<Value> {
        let result = self.router.call(extension, endpoint, params).await;
        if result.success {
            Ok(result.data.unwrap_or(Value::Null))
        } else {
            Err(ExtensionError::ExecutionFailed(
                result.error.unwrap_or_else(|| "api call failed".to_string()),
            ))
        }
    }
}

/// UI registration bridge bound to one extension, enforcing the ui
/// permission and attributing elements for later force-removal.
struct ScopedUi {
    name: String,
    metadata: Arc<RwLock<HashMap<String, ExtensionMetadata>>>,
    registry: Arc<UiRegistry>,
}

#[async_trait::async_trait]
impl UiRegistrar for ScopedUi {
    async fn add_element(&self, kind: UiElementKind, title: &str) -> SdkResult<UiElement> {
        let granted = {
            self.metadata
                .read()
                .await
                .get(&self.name)
                .map(|m| m.granted_permissions)
                .unwrap_or_else(Permissions::empty)
        };
        if !granted.allows(Permissions::UI) {
            return Err(ExtensionError::PermissionDenied(format!(
                "'{}' lacks the ui permission",
                self.name
            )));
        }
        Ok(self.registry.add_element(&self.name, kind, title).await)
    }
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(destination)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target: PathBuf = destination.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
