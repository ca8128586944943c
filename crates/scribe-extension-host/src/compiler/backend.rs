//! Pluggable compilation backend.
//!
//! The host asks a [`CompilerBackend`] to turn an extension's source tree
//! into a loadable dynamic library and to validate emitted artifacts. The
//! default [`CargoBackend`] shells out to `cargo` and parses its JSON
//! message stream.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::diagnostics::{parse_artifact_message, parse_cargo_message, Diagnostic};

/// One compilation request handed to a backend.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Extension name, for logging only.
    pub extension_name: String,
    /// Randomized per-invocation unit name; keeps concurrent builds of the
    /// same extension from clobbering each other's intermediate output.
    pub unit_name: String,
    /// Root of the extension's source tree.
    pub source_root: PathBuf,
    /// Source files found under the root, already filtered.
    pub sources: Vec<PathBuf>,
    /// Extra library search paths (host-provided plus bundled).
    pub library_paths: Vec<PathBuf>,
    /// Symbol the emitted module must export.
    pub entry_point: String,
}

/// A successfully emitted build output.
#[derive(Debug, Clone)]
pub struct EmittedArtifact {
    /// The dynamic library.
    pub module: PathBuf,
    /// Companion debug symbols, when the toolchain produced them.
    pub debug_symbols: Option<PathBuf>,
    /// Per-invocation intermediate build tree. The caller deletes it once
    /// the artifact is installed in the cache.
    pub build_dir: Option<PathBuf>,
}

/// Produces loadable modules from extension sources.
#[async_trait]
pub trait CompilerBackend: Send + Sync {
    /// Compiles the request into an artifact, or returns every diagnostic
    /// the toolchain reported.
    async fn compile(
        &self,
        request: &CompileRequest,
    ) -> std::result::Result<EmittedArtifact, Vec<Diagnostic>>;

    /// Checks that `module` is loadable and exports `entry_point`.
    fn validate(&self, module: &Path, entry_point: &str) -> std::result::Result<(), String>;
}

/// Default backend: `cargo build --release` against the extension's own
/// package, with output parsed from `--message-format=json`.
pub struct CargoBackend {
    cargo: String,
    target_root: PathBuf,
}

impl CargoBackend {
    pub fn new() -> Self {
        Self {
            cargo: "cargo".to_string(),
            target_root: std::env::temp_dir().join("scribe-extension-build"),
        }
    }

    /// Overrides the directory intermediate build output lands in.
    pub fn with_target_root(mut self, target_root: PathBuf) -> Self {
        self.target_root = target_root;
        self
    }
}

impl Default for CargoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompilerBackend for CargoBackend {
    async fn compile(
        &self,
        request: &CompileRequest,
    ) -> std::result::Result<EmittedArtifact, Vec<Diagnostic>> {
        let target_dir = self.target_root.join(&request.unit_name);
        debug!(
            extension_id = %request.extension_name,
            target_dir = %target_dir.display(),
            "invoking cargo"
        );

        let mut command = Command::new(&self.cargo);
        command
            .arg("build")
            .arg("--release")
            .arg("--message-format=json")
            .current_dir(&request.source_root)
            .env("CARGO_TARGET_DIR", &target_dir);
        if !request.library_paths.is_empty() {
            let flags = request
                .library_paths
                .iter()
                .map(|p| format!("-L{}", p.display()))
                .collect::<Vec<_>>()
                .join(" ");
            command.env("RUSTFLAGS", flags);
        }

        let output = command
            .output()
            .await
            .map_err(|e| vec![Diagnostic::error(format!("failed to invoke {}: {e}", self.cargo))])?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut diagnostics: Vec<Diagnostic> =
            stdout.lines().filter_map(parse_cargo_message).collect();
        let artifact = stdout.lines().filter_map(parse_artifact_message).last();

        if !output.status.success() {
            if diagnostics.iter().all(|d| !d.is_error()) {
                let stderr = String::from_utf8_lossy(&output.stderr);
                diagnostics.push(Diagnostic::error(
                    stderr.lines().last().unwrap_or("build failed").to_string(),
                ));
            }
            warn!(
                extension_id = %request.extension_name,
                diagnostics = diagnostics.len(),
                "cargo build failed"
            );
            let _ = std::fs::remove_dir_all(&target_dir);
            return Err(diagnostics);
        }

        let Some(module) = artifact else {
            let _ = std::fs::remove_dir_all(&target_dir);
            return Err(vec![Diagnostic::error(
                "build succeeded but emitted no dynamic library",
            )]);
        };

        let debug_symbols = ["pdb", "dwp"]
            .iter()
            .map(|ext| module.with_extension(ext))
            .find(|p| p.exists());

        Ok(EmittedArtifact {
            module,
            debug_symbols,
            build_dir: Some(target_dir),
        })
    }

    fn validate(&self, module: &Path, entry_point: &str) -> std::result::Result<(), String> {
        // SAFETY: the module is only opened to resolve the entry symbol; no
        // extension code runs during validation.
        let library = unsafe { libloading::Library::new(module) }
            .map_err(|e| format!("module is not loadable: {e}"))?;
        let symbol: std::result::Result<libloading::Symbol<'_, *mut std::ffi::c_void>, _> =
            unsafe { library.get(entry_point.as_bytes()) };
        symbol
            .map(|_| ())
            .map_err(|e| format!("entry point '{entry_point}' not exported: {e}"))
    }
}
