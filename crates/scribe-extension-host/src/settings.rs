//! Persisted per-extension enabled flags.
//!
//! A single JSON object under one well-known settings key maps extension
//! name to enabled flag. Absent or unreadable data means enabled; an
//! extension is only ever skipped at startup by an explicit `false`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::contracts::SettingsStore;
use crate::error::Result;

/// Settings key holding the enabled-flag blob.
pub const ENABLED_FLAGS_KEY: &str = "extensions.enabled";

/// Reads and writes the enabled-flag blob through a [`SettingsStore`].
pub struct EnabledFlags {
    store: Arc<dyn SettingsStore>,
}

impl EnabledFlags {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Whether `name` is enabled. Defaults to true when the blob or the
    /// entry is missing, or the blob does not parse.
    pub async fn is_enabled(&self, name: &str) -> bool {
        self.read().await.get(name).copied().unwrap_or(true)
    }

    /// Persists the flag for `name`, preserving every other entry.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut flags = self.read().await;
        flags.insert(name.to_string(), enabled);
        let blob = serde_json::to_string(&flags)?;
        self.store.set(ENABLED_FLAGS_KEY, &blob).await
    }

    /// Drops the persisted flag for `name`, if any. Called on uninstall.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut flags = self.read().await;
        if flags.remove(name).is_some() {
            let blob = serde_json::to_string(&flags)?;
            self.store.set(ENABLED_FLAGS_KEY, &blob).await?;
        }
        Ok(())
    }

    async fn read(&self) -> BTreeMap<String, bool> {
        let Some(blob) = self.store.get(ENABLED_FLAGS_KEY).await else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&blob) {
            Ok(flags) => flags,
            Err(e) => {
                warn!(error = %e, "unreadable enabled-flag blob, treating all as enabled");
                BTreeMap::new()
            }
        }
    }
}
