//! Extension manifest for metadata and configuration.
//!
//! Every extension ships a `manifest.json` at its root describing identity,
//! dependencies and requested permissions.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExtensionError, Result};
use crate::permissions::Permissions;

/// Name of the manifest file at an extension's install root.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Declarative description of an extension: identity, dependencies and
/// requested permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtensionManifest {
    /// Unique extension name. Doubles as the install directory name.
    pub name: String,

    /// Extension version (semver string).
    pub version: String,

    /// Dependencies on other extensions: name to version-range string.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// Permission names requested by the extension.
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Symbol the loader resolves to instantiate the extension.
    pub entry_point: String,

    /// Human-friendly name shown in listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Path to an icon file, relative to the extension root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ExtensionManifest {
    /// Creates a minimal manifest with just name, version and entry point.
    pub fn minimal(
        name: impl Into<String>,
        version: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: BTreeMap::new(),
            permissions: Vec::new(),
            entry_point: entry_point.into(),
            display_name: None,
            description: None,
            author: None,
            website: None,
            icon: None,
        }
    }

    /// Loads a manifest from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExtensionError::Manifest(e.to_string()))
    }

    /// Converts the manifest to a pretty-printed JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExtensionError::Manifest(e.to_string()))
    }

    /// Checks the required fields: non-empty name and entry point, and a
    /// parsable semver version.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ExtensionError::Manifest("Name must not be empty".into()));
        }
        if self.entry_point.trim().is_empty() {
            return Err(ExtensionError::Manifest(
                "EntryPoint must not be empty".into(),
            ));
        }
        semver::Version::parse(&self.version)
            .map_err(|e| ExtensionError::Manifest(format!("Invalid Version '{}': {}", self.version, e)))?;
        Ok(())
    }

    /// Requested permissions parsed into a bitmask. Unknown permission names
    /// are ignored here; the host surfaces them separately if it cares.
    pub fn requested_permissions(&self) -> Permissions {
        let (permissions, _) = Permissions::from_names(self.permissions.iter().map(String::as_str));
        permissions
    }

    /// Display name, falling back to the unique name.
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Adds a dependency.
    pub fn with_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), range.into());
        self
    }

    /// Adds a requested permission name.
    pub fn with_permission(mut self, name: impl Into<String>) -> Self {
        self.permissions.push(name.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}
