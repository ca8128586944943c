//! Dependency resolution across registered extensions.
//!
//! Produces a load order in which every dependency precedes its dependents,
//! while collecting (rather than short-circuiting on) cycles, missing
//! dependencies and version mismatches. A cyclic branch is excluded from the
//! load order; unrelated extensions still resolve normally.

use std::collections::{HashMap, HashSet};

use scribe_extension_sdk::ExtensionManifest;

use crate::types::{DependencyResolutionResult, MissingDependency};

/// Color state of the depth-first traversal: absent = white, `visiting` =
/// gray, `visited` = black.
struct Traversal<'a> {
    by_name: HashMap<&'a str, &'a ExtensionManifest>,
    visiting: HashSet<&'a str>,
    visited: HashSet<&'a str>,
}

/// Computes safe load orders and validates version constraints.
#[derive(Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves a load order over `manifests`, rooting one DFS per
    /// not-yet-visited extension in input order.
    pub fn resolve(&self, manifests: &[ExtensionManifest]) -> DependencyResolutionResult {
        let mut traversal = Traversal {
            by_name: manifests.iter().map(|m| (m.name.as_str(), m)).collect(),
            visiting: HashSet::new(),
            visited: HashSet::new(),
        };
        let mut result = DependencyResolutionResult::default();

        for manifest in manifests {
            if !traversal.visited.contains(manifest.name.as_str()) {
                self.visit(manifest.name.as_str(), &mut traversal, &mut result);
            }
        }

        result
    }

    /// Visits one node. Returns false when this node or anything below it is
    /// part of a cycle, in which case nothing in the failing chain is
    /// appended to the load order.
    fn visit<'a>(
        &self,
        name: &'a str,
        traversal: &mut Traversal<'a>,
        result: &mut DependencyResolutionResult,
    ) -> bool {
        if traversal.visited.contains(name) {
            return true;
        }
        if traversal.visiting.contains(name) {
            if !result.circular_dependencies.iter().any(|n| n == name) {
                result.circular_dependencies.push(name.to_string());
            }
            result
                .errors
                .push(format!("Circular dependency detected involving '{name}'"));
            return false;
        }

        traversal.visiting.insert(name);
        let manifest = traversal.by_name[name];
        let mut ok = true;

        for (dependency, range) in &manifest.dependencies {
            match traversal.by_name.get(dependency.as_str()) {
                None => {
                    // Missing dependencies are recorded but do not abort the
                    // traversal; remaining dependencies are still checked.
                    result.missing_dependencies.push(MissingDependency {
                        dependent: name.to_string(),
                        dependency: dependency.clone(),
                        required_range: range.clone(),
                    });
                    result.errors.push(format!(
                        "Missing dependency: {name} requires {dependency} ({range})"
                    ));
                }
                Some(dep_manifest) => {
                    if !Self::is_version_compatible(&dep_manifest.version, range) {
                        // A version mismatch is reported but does not stop
                        // recursion into the dependency.
                        result.errors.push(format!(
                            "Incompatible version: {name} requires {dependency} {range} but {installed} is installed",
                            installed = dep_manifest.version
                        ));
                    }
                    let dependency = dep_manifest.name.as_str();
                    if !self.visit(dependency, traversal, result) {
                        ok = false;
                        break;
                    }
                }
            }
        }

        traversal.visiting.remove(name);
        if ok {
            traversal.visited.insert(name);
            result.load_order.push(name.to_string());
        }
        ok
    }

    /// Checks only the immediate dependencies of `extension` against the
    /// available set (name to installed version). Transitive dependencies
    /// are the resolver's concern, not this check's.
    pub fn validate_dependencies(
        &self,
        extension: &ExtensionManifest,
        available: &HashMap<String, String>,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        for (dependency, range) in &extension.dependencies {
            match available.get(dependency) {
                None => errors.push(format!(
                    "Missing dependency: {} requires {dependency} ({range})",
                    extension.name
                )),
                Some(installed) => {
                    if !Self::is_version_compatible(installed, range) {
                        errors.push(format!(
                            "Incompatible version: {} requires {dependency} {range} but {installed} is installed",
                            extension.name
                        ));
                    }
                }
            }
        }
        errors
    }

    /// Version-range matching.
    ///
    /// `*` always matches; `^X.Y.Z` requires the same major with installed
    /// at least the required version; `~X.Y.Z` additionally pins the minor;
    /// a bare version is a minimum, not an exact match. Unparsable input is
    /// incompatible.
    pub fn is_version_compatible(installed: &str, required: &str) -> bool {
        let required = required.trim();
        if required == "*" {
            return true;
        }

        let Ok(installed) = semver::Version::parse(installed.trim()) else {
            return false;
        };

        if let Some(base) = required.strip_prefix('^') {
            let Ok(base) = semver::Version::parse(base.trim()) else {
                return false;
            };
            installed.major == base.major && installed >= base
        } else if let Some(base) = required.strip_prefix('~') {
            let Ok(base) = semver::Version::parse(base.trim()) else {
                return false;
            };
            installed.major == base.major && installed.minor == base.minor && installed >= base
        } else {
            let Ok(base) = semver::Version::parse(required) else {
                return false;
            };
            installed >= base
        }
    }
}
