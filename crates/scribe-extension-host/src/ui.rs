//! Host-side tracking of extension-contributed UI elements.
//!
//! Every element registered through an extension's context is attributed to
//! that extension here, so unload can force-remove the lot regardless of
//! whether the extension cleaned up after itself.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use scribe_extension_sdk::{UiElement, UiElementKind};

/// Tracks which extension owns which UI element.
#[derive(Default)]
pub struct UiRegistry {
    elements: RwLock<HashMap<String, Vec<UiElement>>>,
}

impl UiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new element for `extension_name`, assigning its id.
    pub async fn add_element(
        &self,
        extension_name: &str,
        kind: UiElementKind,
        title: &str,
    ) -> UiElement {
        let element = UiElement {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.to_string(),
        };
        debug!(
            extension_id = %extension_name,
            element_id = %element.id,
            kind = %element.kind,
            "ui element registered"
        );
        self.elements
            .write()
            .await
            .entry(extension_name.to_string())
            .or_default()
            .push(element.clone());
        element
    }

    /// Elements currently attributed to `extension_name`.
    pub async fn elements_for(&self, extension_name: &str) -> Vec<UiElement> {
        self.elements
            .read()
            .await
            .get(extension_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops every element attributed to `extension_name`, returning what
    /// was removed so the host shell can tear the widgets down.
    pub async fn remove_extension_elements(&self, extension_name: &str) -> Vec<UiElement> {
        let removed = self
            .elements
            .write()
            .await
            .remove(extension_name)
            .unwrap_or_default();
        if !removed.is_empty() {
            debug!(
                extension_id = %extension_name,
                removed = removed.len(),
                "ui elements force-removed"
            );
        }
        removed
    }
}
