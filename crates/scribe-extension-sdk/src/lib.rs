//! Scribe Extension SDK
//!
//! This crate defines everything an extension author implements and everything
//! the host and an extension share at the boundary:
//!
//! - The [`ExtensionManifest`] model for `manifest.json`
//! - The [`Permissions`] bitmask granted to an extension
//! - The base [`ExtensionInstance`] trait plus the optional capability traits
//!   ([`ServiceContribution`], [`UiContribution`], [`ApiContribution`])
//! - The [`ExtensionContext`] capability handle passed into every hook
//! - The [`ServiceContainer`] type-map used for service contribution

pub mod capability;
pub mod context;
pub mod error;
pub mod manifest;
pub mod permissions;
pub mod services;
pub mod ui;

pub use capability::{
    ApiContribution, ApiEndpointSpec, ExtensionInstance, ServiceContribution, UiContribution,
};
pub use context::{ApiCaller, ExtensionContext, RuntimePermissions, UiRegistrar};
pub use error::{ExtensionError, Result};
pub use manifest::{ExtensionManifest, MANIFEST_FILE_NAME};
pub use permissions::Permissions;
pub use services::ServiceContainer;
pub use ui::{UiElement, UiElementKind};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::capability::{
        ApiContribution, ApiEndpointSpec, ExtensionInstance, ServiceContribution, UiContribution,
    };
    pub use crate::context::ExtensionContext;
    pub use crate::error::{ExtensionError, Result};
    pub use crate::manifest::ExtensionManifest;
    pub use crate::permissions::Permissions;
    pub use crate::services::ServiceContainer;
    pub use crate::ui::{UiElement, UiElementKind};
    pub use serde_json::Value;
}
