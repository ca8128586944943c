//! Source-based extension compilation.
//!
//! Extensions that ship source instead of a prebuilt module are compiled
//! on demand into a per-user cache:
//! - Source collection excludes build output and generated files
//! - Artifacts are cached as `<name>.<dylib-ext>` plus optional symbols
//! - Staleness is decided by comparing source mtimes against the artifact
//! - Emitted modules are validated before they are ever handed to a loader

mod backend;
mod diagnostics;

pub use backend::{CargoBackend, CompileRequest, CompilerBackend, EmittedArtifact};
pub use diagnostics::{Diagnostic, DiagnosticSeverity};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HostError, Result};

/// Directory names never treated as extension source.
const EXCLUDED_DIRS: &[&str] = &["target", "build", "dist", "node_modules"];

/// Suffix marking generated files, which are likewise skipped.
const GENERATED_SUFFIX: &str = ".gen.rs";

/// File extension used for cached debug symbols.
const SYMBOLS_EXTENSION: &str = "sym";

/// Outcome of one compilation attempt.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub success: bool,
    /// Cached artifact path, set only on success.
    pub output_path: Option<PathBuf>,
    /// One-line failure summary, set only on failure.
    pub error_summary: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilationResult {
    fn succeeded(output_path: PathBuf, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: true,
            output_path: Some(output_path),
            error_summary: None,
            diagnostics,
        }
    }

    fn failed(summary: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            output_path: None,
            error_summary: Some(summary.into()),
            diagnostics,
        }
    }
}

/// Compiles source-based extensions and manages their cached artifacts.
pub struct ExtensionCompiler {
    cache_dir: PathBuf,
    library_paths: Vec<PathBuf>,
    backend: Arc<dyn CompilerBackend>,
}

impl ExtensionCompiler {
    pub fn new(cache_dir: PathBuf, backend: Arc<dyn CompilerBackend>) -> Self {
        Self {
            cache_dir,
            library_paths: Vec::new(),
            backend,
        }
    }

    /// Adds host-provided library search paths passed to every build.
    pub fn with_library_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.library_paths = paths;
        self
    }

    /// Cache location of the compiled module for `name`.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{name}.{}", std::env::consts::DLL_EXTENSION))
    }

    /// Cache location of the debug symbols for `name`.
    pub fn debug_symbols_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{name}.{SYMBOLS_EXTENSION}"))
    }

    /// Compiles the extension at `source_root` and installs the artifact in
    /// the cache, overwriting any previous build. On any failure the cached
    /// artifacts for `name` are removed so no partial output survives.
    pub async fn compile(
        &self,
        source_root: &Path,
        name: &str,
        entry_point: &str,
    ) -> CompilationResult {
        if let Err(e) = std::fs::create_dir_all(&self.cache_dir) {
            return CompilationResult::failed(
                format!("cannot create cache directory {}: {e}", self.cache_dir.display()),
                Vec::new(),
            );
        }

        let sources = collect_sources(source_root);
        if sources.is_empty() {
            return CompilationResult::failed(
                format!("no source files found under {}", source_root.display()),
                Vec::new(),
            );
        }
        debug!(extension_id = %name, sources = sources.len(), "collected sources");

        let mut library_paths = self.library_paths.clone();
        library_paths.extend(bundled_library_dirs(source_root));

        let request = CompileRequest {
            extension_name: name.to_string(),
            unit_name: format!("{name}-{}", Uuid::new_v4().simple()),
            source_root: source_root.to_path_buf(),
            sources,
            library_paths,
            entry_point: entry_point.to_string(),
        };

        let emitted = match self.backend.compile(&request).await {
            Ok(emitted) => emitted,
            Err(diagnostics) => {
                self.remove_artifacts(name);
                let summary = diagnostics
                    .iter()
                    .find(|d| d.is_error())
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "compilation failed".to_string());
                warn!(extension_id = %name, %summary, "compilation failed");
                return CompilationResult::failed(summary, diagnostics);
            }
        };

        let result = self.install_emitted(name, entry_point, &emitted);
        // The intermediate build tree is only needed until the module is in
        // the cache; left behind it grows without bound across recompiles.
        if let Some(build_dir) = &emitted.build_dir {
            let _ = std::fs::remove_dir_all(build_dir);
        }
        result
    }

    fn install_emitted(
        &self,
        name: &str,
        entry_point: &str,
        emitted: &EmittedArtifact,
    ) -> CompilationResult {
        let artifact = self.artifact_path(name);
        if let Err(e) = std::fs::copy(&emitted.module, &artifact) {
            self.remove_artifacts(name);
            return CompilationResult::failed(
                format!("cannot install artifact into cache: {e}"),
                Vec::new(),
            );
        }
        if let Some(symbols) = &emitted.debug_symbols {
            if let Err(e) = std::fs::copy(symbols, self.debug_symbols_path(name)) {
                warn!(extension_id = %name, error = %e, "debug symbols not cached");
            }
        }

        if let Err(reason) = self.backend.validate(&artifact, entry_point) {
            self.remove_artifacts(name);
            warn!(extension_id = %name, %reason, "emitted artifact failed validation");
            return CompilationResult::failed(
                format!("artifact validation failed: {reason}"),
                Vec::new(),
            );
        }

        info!(extension_id = %name, artifact = %artifact.display(), "compiled");
        CompilationResult::succeeded(artifact, Vec::new())
    }

    /// Validates an already-cached artifact without rebuilding it.
    pub fn validate_cached(&self, name: &str, entry_point: &str) -> Result<()> {
        let artifact = self.artifact_path(name);
        if !artifact.exists() {
            return Err(HostError::ArtifactValidationFailed {
                extension: name.to_string(),
                reason: format!("no cached artifact at {}", artifact.display()),
            });
        }
        self.backend
            .validate(&artifact, entry_point)
            .map_err(|reason| HostError::ArtifactValidationFailed {
                extension: name.to_string(),
                reason,
            })
    }

    /// True when no cached artifact exists or any source file is newer than
    /// it. Mtime-only: content changes that keep an older timestamp are not
    /// detected.
    pub fn needs_recompilation(&self, source_root: &Path, name: &str) -> bool {
        let artifact = self.artifact_path(name);
        let Some(artifact_mtime) = mtime(&artifact) else {
            return true;
        };
        collect_sources(source_root)
            .iter()
            .any(|source| matches!(mtime(source), Some(m) if m > artifact_mtime))
    }

    /// Deletes the cached artifacts for `name`, if present.
    pub fn remove_artifacts(&self, name: &str) {
        let _ = std::fs::remove_file(self.artifact_path(name));
        let _ = std::fs::remove_file(self.debug_symbols_path(name));
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Recursively gathers `.rs` files under `root`, skipping build output,
/// hidden directories and generated files.
fn collect_sources(root: &Path) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if path.is_dir() {
                if file_name.starts_with('.') || EXCLUDED_DIRS.contains(&file_name.as_ref()) {
                    continue;
                }
                stack.push(path);
            } else if file_name.ends_with(".rs") && !file_name.ends_with(GENERATED_SUFFIX) {
                sources.push(path);
            }
        }
    }
    sources.sort();
    sources
}

/// Directories inside the extension that hold bundled libraries, added to
/// the build's search path.
fn bundled_library_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let lib_dir = root.join("lib");
    for candidate in [root.to_path_buf(), lib_dir] {
        let Ok(entries) = std::fs::read_dir(&candidate) else {
            continue;
        };
        let has_libraries = entries.flatten().any(|entry| {
            let path = entry.path();
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("so") | Some("dylib") | Some("dll") | Some("rlib") | Some("a")
            )
        });
        if has_libraries {
            dirs.push(candidate);
        }
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;

    /// Backend that "emits" a fixed byte blob, or fails with canned
    /// diagnostics.
    struct FakeBackend {
        failure: Option<Vec<Diagnostic>>,
        emit_dir: PathBuf,
    }

    #[async_trait]
    impl CompilerBackend for FakeBackend {
        async fn compile(
            &self,
            request: &CompileRequest,
        ) -> std::result::Result<EmittedArtifact, Vec<Diagnostic>> {
            if let Some(diagnostics) = &self.failure {
                return Err(diagnostics.clone());
            }
            let build_dir = self.emit_dir.join(&request.unit_name);
            std::fs::create_dir_all(&build_dir).unwrap();
            let module = build_dir.join("module.out");
            std::fs::write(&module, b"fake module").unwrap();
            Ok(EmittedArtifact {
                module,
                debug_symbols: None,
                build_dir: Some(build_dir),
            })
        }

        fn validate(&self, module: &Path, _entry_point: &str) -> std::result::Result<(), String> {
            if module.exists() {
                Ok(())
            } else {
                Err("missing".to_string())
            }
        }
    }

    fn setup(failure: Option<Vec<Diagnostic>>) -> (tempfile::TempDir, ExtensionCompiler) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend {
            failure,
            emit_dir: dir.path().to_path_buf(),
        });
        let compiler = ExtensionCompiler::new(dir.path().join("cache"), backend);
        (dir, compiler)
    }

    fn write_source(dir: &Path, relative: &str) -> PathBuf {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "pub fn noop() {}").unwrap();
        path
    }

    #[test]
    fn test_collect_sources_skips_build_output_and_generated() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "src/lib.rs");
        write_source(dir.path(), "src/nested/util.rs");
        write_source(dir.path(), "target/release/junk.rs");
        write_source(dir.path(), "build/out.rs");
        write_source(dir.path(), ".hidden/secret.rs");
        write_source(dir.path(), "src/bindings.gen.rs");
        std::fs::write(dir.path().join("notes.txt"), "not source").unwrap();

        let sources = collect_sources(dir.path());
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|p| !p.to_string_lossy().contains("target")));
    }

    #[tokio::test]
    async fn test_compile_installs_artifact_into_cache() {
        let (dir, compiler) = setup(None);
        write_source(dir.path(), "src/lib.rs");

        let result = compiler.compile(dir.path(), "demo", "entry").await;
        assert!(result.success, "{:?}", result.error_summary);
        let artifact = result.output_path.unwrap();
        assert_eq!(artifact, compiler.artifact_path("demo"));
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn test_compile_removes_intermediate_build_tree() {
        let (dir, compiler) = setup(None);
        write_source(dir.path(), "src/lib.rs");

        let result = compiler.compile(dir.path(), "demo", "entry").await;
        assert!(result.success);
        assert!(compiler.artifact_path("demo").exists());

        // Only the cache survives; the per-invocation build tree is gone.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| {
                e.path().is_dir() && e.file_name().to_string_lossy().starts_with("demo-")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_compile_fails_without_sources() {
        let (dir, compiler) = setup(None);
        let result = compiler.compile(dir.path(), "demo", "entry").await;
        assert!(!result.success);
        assert!(result.error_summary.unwrap().contains("no source files"));
    }

    #[tokio::test]
    async fn test_failed_compile_removes_cached_artifact() {
        let (dir, compiler) = setup(Some(vec![Diagnostic::error("boom")]));
        write_source(dir.path(), "src/lib.rs");
        std::fs::create_dir_all(compiler.artifact_path("demo").parent().unwrap()).unwrap();
        std::fs::write(compiler.artifact_path("demo"), b"stale").unwrap();

        let result = compiler.compile(dir.path(), "demo", "entry").await;
        assert!(!result.success);
        assert_eq!(result.error_summary.as_deref(), Some("boom"));
        assert_eq!(result.diagnostics.len(), 1);
        assert!(!compiler.artifact_path("demo").exists());
    }

    #[tokio::test]
    async fn test_needs_recompilation_tracks_source_mtime() {
        let (dir, compiler) = setup(None);
        let source = write_source(dir.path(), "src/lib.rs");

        // No artifact yet.
        assert!(compiler.needs_recompilation(dir.path(), "demo"));

        let result = compiler.compile(dir.path(), "demo", "entry").await;
        assert!(result.success);
        assert!(!compiler.needs_recompilation(dir.path(), "demo"));

        // Advance the source past the artifact deterministically.
        let file = std::fs::File::options().append(true).open(&source).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        assert!(compiler.needs_recompilation(dir.path(), "demo"));
    }

    #[tokio::test]
    async fn test_validate_cached_requires_artifact() {
        let (dir, compiler) = setup(None);
        write_source(dir.path(), "src/lib.rs");
        assert!(compiler.validate_cached("demo", "entry").is_err());

        compiler.compile(dir.path(), "demo", "entry").await;
        assert!(compiler.validate_cached("demo", "entry").is_ok());
    }
}
