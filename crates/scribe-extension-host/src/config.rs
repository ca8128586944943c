//! Host runtime configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const APP_DIR: &str = "scribe";

/// Filesystem roots and tunables for the extension runtime.
///
/// All paths have `dirs`-derived defaults; a host can deserialize overrides
/// from its own configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Extensions shipped with the application. Always Development trust.
    pub bundled_root: PathBuf,
    /// User-installed extensions, one subdirectory per extension.
    pub user_root: PathBuf,
    /// Per-user cache for compiled extension modules.
    pub cache_dir: PathBuf,
    /// Extra library search paths passed to every source build.
    pub library_paths: Vec<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let data = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        let cache = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            bundled_root: PathBuf::from("extensions"),
            user_root: data.join(APP_DIR).join("extensions"),
            cache_dir: cache.join(APP_DIR).join("extension-modules"),
            library_paths: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundled_root(mut self, path: PathBuf) -> Self {
        self.bundled_root = path;
        self
    }

    pub fn with_user_root(mut self, path: PathBuf) -> Self {
        self.user_root = path;
        self
    }

    pub fn with_cache_dir(mut self, path: PathBuf) -> Self {
        self.cache_dir = path;
        self
    }
}
