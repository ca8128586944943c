//! Lifecycle orchestration tests.
//!
//! Runs the manager against in-memory collaborators and a filesystem layout
//! built in a temp directory: load/unload/enable/disable, dependency
//! ordering and failures, permission grants, endpoint routing and
//! uninstall.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use scribe_extension_host::prelude::*;
use scribe_extension_host::{MemorySettingsStore, MemoryTrustStore, ENABLED_FLAGS_KEY};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default, Clone, Copy)]
struct InstanceFlags {
    with_ui: bool,
    with_api: bool,
    fail_ui: bool,
    fail_unload: bool,
}

/// Scripted extension instance with per-hook counters.
#[derive(Default)]
struct TestInstance {
    flags: InstanceFlags,
    enable_calls: AtomicUsize,
    disable_calls: AtomicUsize,
    api_calls: AtomicUsize,
}

impl TestInstance {
    fn with_flags(flags: InstanceFlags) -> Arc<Self> {
        Arc::new(Self {
            flags,
            ..Self::default()
        })
    }
}

#[async_trait]
impl ExtensionInstance for TestInstance {
    async fn on_enable(&self, _ctx: &ExtensionContext) -> Result<()> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_disable(&self, _ctx: &ExtensionContext) -> Result<()> {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_unload(&self, _ctx: &ExtensionContext) -> Result<()> {
        if self.flags.fail_unload {
            return Err(ExtensionError::ExecutionFailed("unload hook refused".into()));
        }
        Ok(())
    }

    fn ui_contribution(&self) -> Option<&dyn UiContribution> {
        self.flags.with_ui.then_some(self as &dyn UiContribution)
    }

    fn api_contribution(&self) -> Option<&dyn ApiContribution> {
        self.flags.with_api.then_some(self as &dyn ApiContribution)
    }
}

#[async_trait]
impl UiContribution for TestInstance {
    async fn register_ui(&self, ctx: &ExtensionContext) -> Result<()> {
        if self.flags.fail_ui {
            return Err(ExtensionError::ExecutionFailed("panel construction failed".into()));
        }
        ctx.register_ui_element(UiElementKind::SidebarPanel, "Test Panel")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiContribution for TestInstance {
    fn endpoints(&self) -> Vec<ApiEndpointSpec> {
        vec![ApiEndpointSpec::new("ping", Permissions::API_REGISTRATION)]
    }

    async fn handle(&self, _endpoint: &str, _params: Value) -> Result<Value> {
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "pong": true }))
    }
}

/// Loader over the temp-directory layout; instances are looked up from a
/// scripted map, defaulting to a plain `TestInstance`.
#[derive(Default)]
struct MockLoader {
    instances: std::sync::Mutex<HashMap<String, Arc<TestInstance>>>,
    load_order: std::sync::Mutex<Vec<String>>,
    load_errors: std::sync::Mutex<HashMap<String, Vec<String>>>,
}

impl MockLoader {
    fn script(&self, name: &str, instance: Arc<TestInstance>) {
        self.instances
            .lock()
            .unwrap()
            .insert(name.to_string(), instance);
    }

    fn script_load_error(&self, name: &str, message: &str) {
        self.load_errors
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(message.to_string());
    }

    fn instance(&self, name: &str) -> Arc<TestInstance> {
        self.instances
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn loaded_names(&self) -> Vec<String> {
        self.load_order.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtensionLoader for MockLoader {
    async fn discover(
        &self,
        root: &Path,
    ) -> scribe_extension_host::Result<Vec<ExtensionMetadata>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if let Some(manifest) = self.parse_manifest(&path.join("manifest.json")) {
                found.push(ExtensionMetadata::new(manifest, path, false));
            }
        }
        Ok(found)
    }

    async fn load(
        &self,
        metadata: &ExtensionMetadata,
    ) -> scribe_extension_host::Result<LoadOutcome> {
        self.load_order
            .lock()
            .unwrap()
            .push(metadata.name().to_string());
        Ok(LoadOutcome {
            instance: self.instance(metadata.name()),
            errors: self
                .load_errors
                .lock()
                .unwrap()
                .get(metadata.name())
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn unload(&self, _name: &str) -> scribe_extension_host::Result<()> {
        Ok(())
    }

    async fn unload_all(&self) -> scribe_extension_host::Result<()> {
        Ok(())
    }

    fn parse_manifest(&self, path: &Path) -> Option<ExtensionManifest> {
        ExtensionManifest::from_file(path).ok()
    }
}

/// Prompt that approves (or denies) everything the manifest requested.
struct StaticPrompt {
    approve: bool,
}

#[async_trait]
impl PermissionPrompt for StaticPrompt {
    async fn prompt_initial(&self, metadata: &ExtensionMetadata) -> PromptDecision {
        PromptDecision {
            approved: self.approve,
            granted: metadata.manifest.requested_permissions(),
        }
    }

    async fn prompt_runtime(&self, _metadata: &ExtensionMetadata, _permission: Permissions) -> bool {
        self.approve
    }
}

struct NullUnpacker;

#[async_trait]
impl PackageUnpacker for NullUnpacker {
    async fn unpack(&self, _package: &Path, _destination_root: &Path) -> UnpackOutcome {
        UnpackOutcome {
            success: false,
            manifest: None,
            error: Some("no package support in tests".to_string()),
        }
    }
}

struct Harness {
    _root: tempfile::TempDir,
    manager: ExtensionManager,
    loader: Arc<MockLoader>,
    settings: Arc<MemorySettingsStore>,
}

/// Writes an extension directory with a manifest and a dummy prebuilt
/// module, so loads never reach the real compiler.
fn write_extension(root: &Path, manifest: &ExtensionManifest) {
    let dir = root.join(&manifest.name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("manifest.json"), manifest.to_json().unwrap()).unwrap();
    std::fs::write(dir.join("module.so"), b"prebuilt").unwrap();
}

fn harness(user_manifests: &[ExtensionManifest]) -> Harness {
    harness_with_prompt(user_manifests, true)
}

fn harness_with_prompt(user_manifests: &[ExtensionManifest], approve: bool) -> Harness {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let user_root = root.path().join("user");
    std::fs::create_dir_all(&user_root).unwrap();
    for manifest in user_manifests {
        write_extension(&user_root, manifest);
    }

    let config = HostConfig::new()
        .with_bundled_root(root.path().join("bundled"))
        .with_user_root(user_root)
        .with_cache_dir(root.path().join("cache"));
    let loader = Arc::new(MockLoader::default());
    let settings = Arc::new(MemorySettingsStore::new());
    let manager = ExtensionManager::new(
        config,
        Arc::clone(&loader) as Arc<dyn ExtensionLoader>,
        Arc::new(MemoryTrustStore::new()),
        Arc::new(StaticPrompt { approve }),
        Arc::new(NullUnpacker),
        Arc::clone(&settings) as Arc<dyn SettingsStore>,
    );
    Harness {
        _root: root,
        manager,
        loader,
        settings,
    }
}

fn api_manifest(name: &str) -> ExtensionManifest {
    ExtensionManifest::minimal(name, "1.0.0", "scribe_extension_create")
        .with_permission("api_registration")
}

fn api_instance() -> Arc<TestInstance> {
    TestInstance::with_flags(InstanceFlags {
        with_api: true,
        ..InstanceFlags::default()
    })
}

#[tokio::test]
async fn test_initialize_loads_dependencies_first() {
    let fx = harness(&[
        ExtensionManifest::minimal("dependent", "1.0.0", "entry").with_dependency("base", "^1.0.0"),
        ExtensionManifest::minimal("base", "1.2.0", "entry"),
    ]);
    fx.manager.initialize().await.unwrap();

    let order = fx.loader.loaded_names();
    assert_eq!(order, vec!["base".to_string(), "dependent".to_string()]);
    assert_eq!(
        fx.manager.get("dependent").await.unwrap().state,
        ExtensionState::Enabled
    );
}

#[tokio::test]
async fn test_on_demand_load_pulls_in_dependency() {
    let fx = harness(&[
        ExtensionManifest::minimal("dependent", "1.0.0", "entry").with_dependency("base", "*"),
        ExtensionManifest::minimal("base", "1.0.0", "entry"),
    ]);
    fx.manager.refresh().await.unwrap();

    fx.manager.load("dependent").await.unwrap();
    assert!(fx.manager.is_loaded("base").await);
    assert_eq!(
        fx.loader.loaded_names(),
        vec!["base".to_string(), "dependent".to_string()]
    );
}

#[tokio::test]
async fn test_load_is_idempotent() {
    let fx = harness(&[ExtensionManifest::minimal("solo", "1.0.0", "entry")]);
    fx.manager.refresh().await.unwrap();

    fx.manager.load("solo").await.unwrap();
    fx.manager.load("solo").await.unwrap();
    assert_eq!(fx.loader.loaded_names().len(), 1);
}

#[tokio::test]
async fn test_incompatible_dependency_version_fails_naming_both_versions() {
    let fx = harness(&[
        ExtensionManifest::minimal("dependent", "1.0.0", "entry").with_dependency("base", "^2.0.0"),
        ExtensionManifest::minimal("base", "1.0.0", "entry"),
    ]);
    fx.manager.refresh().await.unwrap();

    let err = fx.manager.load("dependent").await.unwrap_err();
    assert!(err.to_string().contains("^2.0.0"));

    let meta = fx.manager.get("dependent").await.unwrap();
    assert_eq!(meta.state, ExtensionState::Failed);
    assert!(meta.load_errors.iter().any(|e| e.contains("^2.0.0") && e.contains("1.0.0")));
    assert!(!fx.manager.is_loaded("dependent").await);
}

#[tokio::test]
async fn test_missing_dependency_fails_load() {
    let fx = harness(&[
        ExtensionManifest::minimal("orphan", "1.0.0", "entry").with_dependency("ghost", "^1.0.0")
    ]);
    fx.manager.refresh().await.unwrap();

    assert!(fx.manager.load("orphan").await.is_err());
    let meta = fx.manager.get("orphan").await.unwrap();
    assert_eq!(meta.state, ExtensionState::Failed);
    assert!(meta.load_errors.iter().any(|e| e.contains("ghost")));
}

#[tokio::test]
async fn test_loader_reported_error_fails_load() {
    let fx = harness(&[ExtensionManifest::minimal("shaky", "1.0.0", "entry")]);
    fx.manager.refresh().await.unwrap();
    fx.loader
        .script_load_error("shaky", "relocation failed for module.so");

    assert!(fx.manager.load("shaky").await.is_err());
    let meta = fx.manager.get("shaky").await.unwrap();
    assert_eq!(meta.state, ExtensionState::Failed);
    assert!(meta
        .load_errors
        .iter()
        .any(|e| e.contains("relocation failed")));
    assert!(!fx.manager.is_loaded("shaky").await);
}

#[tokio::test]
async fn test_circular_dependency_fails_both() {
    let fx = harness(&[
        ExtensionManifest::minimal("a", "1.0.0", "entry").with_dependency("b", "*"),
        ExtensionManifest::minimal("b", "1.0.0", "entry").with_dependency("a", "*"),
    ]);
    fx.manager.refresh().await.unwrap();

    assert!(fx.manager.load("a").await.is_err());
    assert!(!fx.manager.is_loaded("a").await);
    assert!(!fx.manager.is_loaded("b").await);
}

#[tokio::test]
async fn test_reload_restores_enabled_with_empty_errors() {
    let fx = harness(&[api_manifest("healthy")]);
    fx.manager.initialize().await.unwrap();
    assert_eq!(
        fx.manager.get("healthy").await.unwrap().state,
        ExtensionState::Enabled
    );

    fx.manager.reload("healthy").await.unwrap();
    let meta = fx.manager.get("healthy").await.unwrap();
    assert_eq!(meta.state, ExtensionState::Enabled);
    assert!(meta.load_errors.is_empty());
    assert!(meta.last_loaded_at.is_some());
}

#[tokio::test]
async fn test_endpoint_call_round_trip() {
    let fx = harness(&[api_manifest("api-ext")]);
    fx.loader.script("api-ext", api_instance());
    fx.manager.initialize().await.unwrap();

    let result = fx.manager.call_api("api-ext", "ping", json!({})).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.data.unwrap()["pong"], true);
    assert_eq!(
        fx.loader.instance("api-ext").api_calls.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_disabled_extension_call_never_invokes_handler() {
    let fx = harness(&[api_manifest("api-ext")]);
    fx.loader.script("api-ext", api_instance());
    fx.manager.initialize().await.unwrap();
    fx.manager.disable("api-ext").await.unwrap();

    let result = fx.manager.call_api("api-ext", "ping", json!({})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Disabled"));
    assert_eq!(
        fx.loader.instance("api-ext").api_calls.load(Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn test_unload_removes_only_that_extensions_endpoints() {
    let fx = harness(&[api_manifest("first"), api_manifest("second")]);
    fx.loader.script("first", api_instance());
    fx.loader.script("second", api_instance());
    fx.manager.initialize().await.unwrap();

    let router = fx.manager.router();
    assert!(router.is_endpoint_registered("second", "ping").await);

    fx.manager.unload("second").await.unwrap();
    assert!(!router.is_endpoint_registered("second", "ping").await);
    assert!(router.is_endpoint_registered("first", "ping").await);
}

#[tokio::test]
async fn test_ui_elements_are_force_removed_at_unload() {
    let manifest = ExtensionManifest::minimal("panelist", "1.0.0", "entry")
        .with_permission("ui");
    let fx = harness(&[manifest]);
    fx.loader.script(
        "panelist",
        TestInstance::with_flags(InstanceFlags {
            with_ui: true,
            ..InstanceFlags::default()
        }),
    );
    fx.manager.initialize().await.unwrap();
    assert_eq!(fx.manager.ui_registry().elements_for("panelist").await.len(), 1);

    fx.manager.unload("panelist").await.unwrap();
    assert!(fx.manager.ui_registry().elements_for("panelist").await.is_empty());
    assert_eq!(
        fx.manager.get("panelist").await.unwrap().state,
        ExtensionState::Unloaded
    );
}

#[tokio::test]
async fn test_ui_registration_failure_fails_load() {
    let manifest = ExtensionManifest::minimal("broken-ui", "1.0.0", "entry")
        .with_permission("ui");
    let fx = harness(&[manifest]);
    fx.loader.script(
        "broken-ui",
        TestInstance::with_flags(InstanceFlags {
            with_ui: true,
            fail_ui: true,
            ..InstanceFlags::default()
        }),
    );
    fx.manager.refresh().await.unwrap();

    assert!(fx.manager.load("broken-ui").await.is_err());
    let meta = fx.manager.get("broken-ui").await.unwrap();
    assert_eq!(meta.state, ExtensionState::Failed);
    assert!(meta
        .load_errors
        .iter()
        .any(|e| e.contains("UI registration failed")));
}

#[tokio::test]
async fn test_failed_unload_restores_prior_state() {
    let fx = harness(&[ExtensionManifest::minimal("sticky", "1.0.0", "entry")]);
    fx.loader.script(
        "sticky",
        TestInstance::with_flags(InstanceFlags {
            fail_unload: true,
            ..InstanceFlags::default()
        }),
    );
    fx.manager.initialize().await.unwrap();

    assert!(fx.manager.unload("sticky").await.is_err());
    // Not stuck in Unloading, and still loaded.
    assert_eq!(
        fx.manager.get("sticky").await.unwrap().state,
        ExtensionState::Enabled
    );
    assert!(fx.manager.is_loaded("sticky").await);
}

#[tokio::test]
async fn test_unload_of_unloaded_extension_fails() {
    let fx = harness(&[ExtensionManifest::minimal("idle", "1.0.0", "entry")]);
    fx.manager.refresh().await.unwrap();
    assert!(fx.manager.unload("idle").await.is_err());
}

#[tokio::test]
async fn test_denied_permissions_abort_load() {
    let fx = harness_with_prompt(&[api_manifest("untrusted")], false);
    fx.manager.refresh().await.unwrap();

    assert!(fx.manager.load("untrusted").await.is_err());
    let meta = fx.manager.get("untrusted").await.unwrap();
    assert_eq!(meta.state, ExtensionState::Failed);
    assert!(meta
        .load_errors
        .iter()
        .any(|e| e.contains("not approved")));
}

#[tokio::test]
async fn test_enable_of_unknown_extension_persists_nothing() {
    let fx = harness(&[]);
    assert!(matches!(
        fx.manager.enable("ghost").await,
        Err(HostError::NotFound(_))
    ));
    assert!(matches!(
        fx.manager.disable("ghost").await,
        Err(HostError::NotFound(_))
    ));
    assert!(fx.settings.get(ENABLED_FLAGS_KEY).await.is_none());
}

#[tokio::test]
async fn test_disable_then_enable_cycles_hooks_and_state() {
    let fx = harness(&[ExtensionManifest::minimal("toggle", "1.0.0", "entry")]);
    fx.manager.initialize().await.unwrap();
    let instance = fx.loader.instance("toggle");
    assert_eq!(instance.enable_calls.load(Ordering::SeqCst), 1);

    fx.manager.disable("toggle").await.unwrap();
    assert_eq!(
        fx.manager.get("toggle").await.unwrap().state,
        ExtensionState::Disabled
    );
    assert_eq!(instance.disable_calls.load(Ordering::SeqCst), 1);

    fx.manager.enable("toggle").await.unwrap();
    assert_eq!(
        fx.manager.get("toggle").await.unwrap().state,
        ExtensionState::Enabled
    );
    assert_eq!(instance.enable_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_enable_of_unloaded_extension_triggers_full_load() {
    let fx = harness(&[ExtensionManifest::minimal("lazy", "1.0.0", "entry")]);
    fx.manager.refresh().await.unwrap();
    assert!(!fx.manager.is_loaded("lazy").await);

    fx.manager.enable("lazy").await.unwrap();
    assert!(fx.manager.is_loaded("lazy").await);
    assert_eq!(
        fx.manager.get("lazy").await.unwrap().state,
        ExtensionState::Enabled
    );
}

#[tokio::test]
async fn test_install_directory_and_uninstall() {
    let fx = harness(&[]);
    let staging = tempfile::tempdir().unwrap();
    let manifest = ExtensionManifest::minimal("installed", "1.0.0", "entry");
    write_extension(staging.path(), &manifest);

    let mut events = fx.manager.subscribe();
    let name = fx
        .manager
        .install(&staging.path().join("installed"))
        .await
        .unwrap();
    assert_eq!(name, "installed");
    let meta = fx.manager.get("installed").await.unwrap();
    assert!(meta.install_path.exists());

    // Installing the same name again collides.
    assert!(fx
        .manager
        .install(&staging.path().join("installed"))
        .await
        .is_err());

    fx.manager.load("installed").await.unwrap();
    fx.manager.uninstall("installed").await.unwrap();
    assert!(fx.manager.get("installed").await.is_none());
    assert!(!meta.install_path.exists());

    let mut saw_uninstalled = false;
    while let Ok(change) = events.try_recv() {
        if change.name == "installed" && change.new_state == ExtensionState::Uninstalled {
            saw_uninstalled = true;
        }
    }
    assert!(saw_uninstalled);
}

#[tokio::test]
async fn test_refresh_never_overwrites_registered_metadata() {
    let fx = harness(&[ExtensionManifest::minimal("stable", "1.0.0", "entry")]);
    fx.manager.initialize().await.unwrap();
    let before = fx.manager.get("stable").await.unwrap();
    assert_eq!(before.state, ExtensionState::Enabled);

    fx.manager.refresh().await.unwrap();
    let after = fx.manager.get("stable").await.unwrap();
    assert_eq!(after.state, ExtensionState::Enabled);
    assert!(fx.manager.is_loaded("stable").await);
}

#[tokio::test]
async fn test_dispose_unloads_everything() {
    let fx = harness(&[
        ExtensionManifest::minimal("one", "1.0.0", "entry"),
        ExtensionManifest::minimal("two", "1.0.0", "entry"),
    ]);
    fx.manager.initialize().await.unwrap();
    assert!(fx.manager.is_loaded("one").await);

    fx.manager.dispose().await;
    assert!(!fx.manager.is_loaded("one").await);
    assert!(!fx.manager.is_loaded("two").await);
}

#[tokio::test]
async fn test_state_changes_are_broadcast() {
    let fx = harness(&[ExtensionManifest::minimal("noisy", "1.0.0", "entry")]);
    fx.manager.refresh().await.unwrap();
    let mut events = fx.manager.subscribe();

    fx.manager.load("noisy").await.unwrap();
    let mut states = Vec::new();
    while let Ok(change) = events.try_recv() {
        if change.name == "noisy" {
            states.push(change.new_state);
        }
    }
    assert_eq!(
        states,
        vec![ExtensionState::Loading, ExtensionState::Enabled]
    );
}
