//! Permissioned dispatch of extension-exposed API endpoints.
//!
//! Extensions register named endpoints with a required permission; external
//! callers go through [`ApiRouter::call`], which checks registration, state
//! and grants before any extension code runs. Handler failures are turned
//! into structured results and never propagate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use scribe_extension_sdk::{ApiEndpointSpec, Permissions};

use crate::error::HostError;
use crate::types::{ExtensionMetadata, ExtensionState, LoadedExtension};

/// One registered endpoint.
#[derive(Debug, Clone)]
pub struct RegisteredApiHandler {
    pub extension_name: String,
    pub endpoint: String,
    pub required_permission: Permissions,
    pub registered_at: DateTime<Utc>,
}

/// Structured outcome of an endpoint call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ApiCallResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

type EndpointKey = (String, String);

/// Concurrent endpoint registry and dispatcher.
///
/// Shares the metadata and loaded-instance registries with the
/// orchestrator; dispatch resolves both at call time so state and grant
/// changes take effect immediately.
pub struct ApiRouter {
    endpoints: RwLock<HashMap<EndpointKey, RegisteredApiHandler>>,
    metadata: Arc<RwLock<HashMap<String, ExtensionMetadata>>>,
    loaded: Arc<RwLock<HashMap<String, LoadedExtension>>>,
}

impl ApiRouter {
    pub fn new(
        metadata: Arc<RwLock<HashMap<String, ExtensionMetadata>>>,
        loaded: Arc<RwLock<HashMap<String, LoadedExtension>>>,
    ) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            metadata,
            loaded,
        }
    }

    /// Registers one endpoint for `extension_name`. One handler per
    /// (extension, endpoint) pair; re-registration replaces the old record.
    pub async fn register_endpoint(&self, extension_name: &str, spec: &ApiEndpointSpec) {
        let key = (extension_name.to_string(), spec.endpoint.clone());
        let handler = RegisteredApiHandler {
            extension_name: extension_name.to_string(),
            endpoint: spec.endpoint.clone(),
            required_permission: spec.required_permission,
            registered_at: Utc::now(),
        };
        let mut endpoints = self.endpoints.write().await;
        if endpoints.insert(key, handler).is_some() {
            warn!(
                extension_id = %extension_name,
                endpoint = %spec.endpoint,
                "endpoint re-registered, replacing previous handler"
            );
        } else {
            debug!(
                extension_id = %extension_name,
                endpoint = %spec.endpoint,
                "endpoint registered"
            );
        }
    }

    /// Removes every endpoint registered by `extension_name`. Other
    /// extensions' endpoints are untouched.
    pub async fn unregister_extension(&self, extension_name: &str) -> usize {
        let mut endpoints = self.endpoints.write().await;
        let before = endpoints.len();
        endpoints.retain(|(owner, _), _| owner != extension_name);
        let removed = before - endpoints.len();
        if removed > 0 {
            debug!(extension_id = %extension_name, removed, "endpoints unregistered");
        }
        removed
    }

    pub async fn is_endpoint_registered(&self, extension_name: &str, endpoint: &str) -> bool {
        self.endpoints
            .read()
            .await
            .contains_key(&(extension_name.to_string(), endpoint.to_string()))
    }

    /// All registered handlers, across every extension.
    pub async fn endpoints(&self) -> Vec<RegisteredApiHandler> {
        self.endpoints.read().await.values().cloned().collect()
    }

    /// Dispatches a call. Fails fast, without touching extension code, when
    /// the endpoint is unregistered, the extension is unknown or not
    /// Enabled, or its grant lacks the required permission.
    pub async fn call(&self, extension_name: &str, endpoint: &str, params: Value) -> ApiCallResult {
        let handler = {
            let endpoints = self.endpoints.read().await;
            match endpoints.get(&(extension_name.to_string(), endpoint.to_string())) {
                Some(handler) => handler.clone(),
                None => {
                    return ApiCallResult::fail(
                        HostError::HandlerNotFound {
                            extension: extension_name.to_string(),
                            endpoint: endpoint.to_string(),
                        }
                        .to_string(),
                    )
                }
            }
        };

        {
            let metadata = self.metadata.read().await;
            let Some(meta) = metadata.get(extension_name) else {
                return ApiCallResult::fail(
                    HostError::NotFound(extension_name.to_string()).to_string(),
                );
            };
            if meta.state != ExtensionState::Enabled {
                return ApiCallResult::fail(format!(
                    "Extension '{extension_name}' is not enabled (state: {})",
                    meta.state
                ));
            }
            if !meta
                .granted_permissions
                .allows(handler.required_permission)
            {
                return ApiCallResult::fail(
                    HostError::PermissionDenied(format!(
                        "{extension_name}/{endpoint} requires {}",
                        handler.required_permission
                    ))
                    .to_string(),
                );
            }
        }

        let instance = {
            let loaded = self.loaded.read().await;
            match loaded.get(extension_name) {
                Some(ext) => Arc::clone(&ext.instance),
                None => {
                    return ApiCallResult::fail(
                        HostError::InstanceNotFound(extension_name.to_string()).to_string(),
                    )
                }
            }
        };

        let Some(api) = instance.api_contribution() else {
            return ApiCallResult::fail(
                HostError::CapabilityNotImplemented {
                    extension: extension_name.to_string(),
                    capability: "api-contribution",
                }
                .to_string(),
            );
        };

        match api.handle(endpoint, params).await {
            Ok(data) => ApiCallResult::ok(data),
            Err(e) => {
                warn!(
                    extension_id = %extension_name,
                    endpoint,
                    error = %e,
                    "endpoint handler failed"
                );
                ApiCallResult::fail(e.to_string())
            }
        }
    }
}
