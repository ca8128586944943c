//! The base extension trait and its optional capability traits.
//!
//! An extension always implements [`ExtensionInstance`]; the optional roles
//! are modeled as separate traits reached through `Option`-returning
//! accessors, so the host probes capabilities with plain pattern matching
//! instead of downcasting.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExtensionContext;
use crate::error::Result;
use crate::permissions::Permissions;
use crate::services::ServiceContainer;

/// The base lifecycle interface every extension instance implements.
///
/// All hooks default to no-ops; an extension overrides only what it needs.
#[async_trait]
pub trait ExtensionInstance: Send + Sync {
    /// Called once after the instance has been constructed and its context
    /// and service container are in place.
    async fn on_load(&self, _ctx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Called when the extension transitions to Enabled.
    async fn on_enable(&self, _ctx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Called when the extension transitions to Disabled.
    async fn on_disable(&self, _ctx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Called right before the instance is torn down.
    async fn on_unload(&self, _ctx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Service-contribution capability, if implemented.
    fn service_contribution(&self) -> Option<&dyn ServiceContribution> {
        None
    }

    /// UI-contribution capability, if implemented.
    fn ui_contribution(&self) -> Option<&dyn UiContribution> {
        None
    }

    /// API-contribution capability, if implemented.
    fn api_contribution(&self) -> Option<&dyn ApiContribution> {
        None
    }
}

/// Capability: the extension registers services into its child container.
///
/// Registration happens before the container is sealed; afterwards the
/// extension resolves services back out through its context.
pub trait ServiceContribution: Send + Sync {
    fn register_services(&self, services: &mut ServiceContainer) -> Result<()>;
}

/// Capability: the extension contributes UI elements.
///
/// Requires the `ui` permission (or full trust). Registration goes through
/// [`ExtensionContext::register_ui_element`] so the host can track and
/// force-remove everything at unload time.
#[async_trait]
pub trait UiContribution: Send + Sync {
    async fn register_ui(&self, ctx: &ExtensionContext) -> Result<()>;
}

/// A callable endpoint an extension exposes, with the permission a caller's
/// target extension must hold for the call to be dispatched.
#[derive(Debug, Clone)]
pub struct ApiEndpointSpec {
    pub endpoint: String,
    pub required_permission: Permissions,
}

impl ApiEndpointSpec {
    pub fn new(endpoint: impl Into<String>, required_permission: Permissions) -> Self {
        Self {
            endpoint: endpoint.into(),
            required_permission,
        }
    }
}

/// Capability: the extension exposes permissioned API endpoints.
///
/// Requires the `api_registration` permission (or full trust).
#[async_trait]
pub trait ApiContribution: Send + Sync {
    /// Endpoints to register with the host's API router.
    fn endpoints(&self) -> Vec<ApiEndpointSpec>;

    /// Handles a dispatched call. Errors are converted into structured
    /// failure results by the router; they never reach the caller raw.
    async fn handle(&self, endpoint: &str, params: Value) -> Result<Value>;
}
