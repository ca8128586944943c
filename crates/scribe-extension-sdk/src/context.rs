//! The capability handle passed to every extension hook.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ExtensionError, Result};
use crate::permissions::Permissions;
use crate::services::ServiceContainer;
use crate::ui::{UiElement, UiElementKind};

/// Host-side bridge for runtime permission requests, already bound to one
/// extension's identity.
#[async_trait]
pub trait RuntimePermissions: Send + Sync {
    /// Asks the host (and, transitively, the user) for an additional
    /// permission at runtime. Returns whether it was granted.
    async fn request(&self, permission: Permissions) -> bool;
}

/// Host-side bridge for calling other extensions' API endpoints. The caller
/// identity is fixed at construction time.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    async fn call(&self, extension: &str, endpoint: &str, params: Value) -> Result<Value>;
}

/// Host-side bridge for registering UI elements, bound to one extension so
/// the host can attribute and later force-remove them.
#[async_trait]
pub trait UiRegistrar: Send + Sync {
    async fn add_element(&self, kind: UiElementKind, title: &str) -> Result<UiElement>;
}

/// Capability handle bound to a single loaded extension.
///
/// Everything an extension may do against the host goes through here: the
/// sealed service container, runtime permission requests, identity-scoped
/// API calls and UI registration.
pub struct ExtensionContext {
    extension_name: String,
    permissions: Arc<dyn RuntimePermissions>,
    api: Arc<dyn ApiCaller>,
    ui: Arc<dyn UiRegistrar>,
    // Attached after service contribution, detached at unload so the
    // container (which holds this context) does not keep it alive.
    services: RwLock<Option<Arc<ServiceContainer>>>,
}

impl ExtensionContext {
    pub fn new(
        extension_name: impl Into<String>,
        permissions: Arc<dyn RuntimePermissions>,
        api: Arc<dyn ApiCaller>,
        ui: Arc<dyn UiRegistrar>,
    ) -> Self {
        Self {
            extension_name: extension_name.into(),
            permissions,
            api,
            ui,
            services: RwLock::new(None),
        }
    }

    /// Name of the extension this context belongs to.
    pub fn extension_name(&self) -> &str {
        &self.extension_name
    }

    /// Requests an additional permission at runtime.
    pub async fn request_permission(&self, permission: Permissions) -> bool {
        self.permissions.request(permission).await
    }

    /// Calls another extension's API endpoint under this extension's
    /// identity.
    pub async fn call_api(&self, extension: &str, endpoint: &str, params: Value) -> Result<Value> {
        self.api.call(extension, endpoint, params).await
    }

    /// Registers a UI element attributed to this extension.
    pub async fn register_ui_element(&self, kind: UiElementKind, title: &str) -> Result<UiElement> {
        self.ui.add_element(kind, title).await
    }

    /// Resolves a service from the attached container, if any.
    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .read()
            .ok()?
            .as_ref()
            .and_then(|container| container.get::<T>())
    }

    /// Attaches the sealed service container. Host-side only.
    pub fn attach_services(&self, container: ServiceContainer) -> Result<()> {
        if !container.is_sealed() {
            return Err(ExtensionError::Services(
                "only a sealed container can be attached".into(),
            ));
        }
        let mut slot = self
            .services
            .write()
            .map_err(|_| ExtensionError::Services("service slot poisoned".into()))?;
        *slot = Some(Arc::new(container));
        Ok(())
    }

    /// Drops the attached container. Host-side only, called at unload.
    pub fn detach_services(&self) {
        if let Ok(mut slot) = self.services.write() {
            *slot = None;
        }
    }
}

impl std::fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("extension_name", &self.extension_name)
            .finish()
    }
}
