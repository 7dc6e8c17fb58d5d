//! Component I — Incremental Planner (spec.md §4.I).
//!
//! Diffs the current virtual filesystem against the previously recorded
//! hash table, classifies every current path into a build decision, and
//! stamps completion metrics. Grounded on the teacher's
//! `utils/incremental.rs::IncrementalBuildState`. Hashing every current
//! file is embarrassingly parallel, so it runs through `rayon` the way
//! the teacher's `utils/performance.rs` parallelizes its own per-file
//! passes.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;

use crate::cache::BundleCache;
use crate::graph::DependencyGraph;
use crate::hash::content_hash;
use crate::types::{BuildMetrics, VirtualFilesystem};

const CONFIG_PATTERNS: &[&str] = &[
    "package.json",
    "tsconfig.json",
    "vite.config.",
    "tailwind.config.",
    "postcss.config.",
    ".env",
];

fn is_config_path(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    CONFIG_PATTERNS.iter().any(|pattern| basename.starts_with(pattern))
}

#[derive(Debug, Clone, Default)]
pub struct ChangeAnalysis {
    pub added: HashSet<String>,
    pub modified: HashSet<String>,
    pub deleted: HashSet<String>,
    pub skippable: HashSet<String>,
    pub affected: HashSet<String>,
    pub requires_full_rebuild: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildReason {
    New,
    Changed,
    DependencyChanged,
    Cached,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct FileBuildDecision {
    pub path: String,
    pub rebuild: bool,
    pub reason: BuildReason,
    pub cached_code: Option<String>,
    pub cached_css: Option<String>,
}

/// Extracts the union of `dependencies` and `devDependencies` keys from a
/// `package.json` body. Malformed JSON yields an empty set rather than an
/// error — planning is purely functional over hashed inputs (spec.md §7:
/// "Planner errors — none").
fn extract_npm_dependencies(package_json: &str) -> HashSet<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(package_json) else {
        return HashSet::new();
    };
    let mut deps = HashSet::new();
    for key in ["dependencies", "devDependencies"] {
        if let Some(obj) = value.get(key).and_then(|v| v.as_object()) {
            deps.extend(obj.keys().cloned());
        }
    }
    deps
}

pub struct IncrementalPlanner {
    previous_hashes: HashMap<String, u32>,
}

impl Default for IncrementalPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalPlanner {
    pub fn new() -> Self {
        Self {
            previous_hashes: HashMap::new(),
        }
    }

    pub fn is_first_build(&self) -> bool {
        self.previous_hashes.is_empty()
    }

    /// `analyzeChanges(currentFiles)` — spec.md §4.I.
    pub fn analyze_changes(
        &mut self,
        current: &VirtualFilesystem,
        graph: &DependencyGraph,
        cache: &mut BundleCache,
    ) -> ChangeAnalysis {
        let is_first_build = self.previous_hashes.is_empty();

        let current_hashes: HashMap<String, u32> = current
            .iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(path, content)| (path.clone(), content_hash(content)))
            .collect();

        let mut added = HashSet::new();
        let mut modified = HashSet::new();
        for (path, hash) in &current_hashes {
            match self.previous_hashes.get(path) {
                None => {
                    added.insert(path.clone());
                }
                Some(prev) if prev != hash => {
                    modified.insert(path.clone());
                }
                _ => {}
            }
        }

        let deleted: HashSet<String> = self
            .previous_hashes
            .keys()
            .filter(|p| !current_hashes.contains_key(*p))
            .cloned()
            .collect();

        let mut changed_or_added: Vec<String> = added.iter().chain(modified.iter()).cloned().collect();
        let mut affected: HashSet<String> = graph.get_affected_files_for_changes(&changed_or_added);
        for deleted_path in &deleted {
            affected.extend(graph.get_affected_files(deleted_path));
        }
        changed_or_added.clear();

        let npm_set = current
            .get("/package.json")
            .map(extract_npm_dependencies)
            .unwrap_or_default();
        let npm_changed = graph.has_npm_dependencies_changed(&npm_set);

        let config_changed = modified
            .iter()
            .chain(deleted.iter())
            .any(|p| is_config_path(p));

        let (requires_full_rebuild, reason) = if is_first_build {
            (true, Some("first build".to_string()))
        } else if npm_changed {
            (true, Some("NPM dependencies changed".to_string()))
        } else if config_changed {
            (true, Some("Config file modified".to_string()))
        } else {
            (false, None)
        };

        let mut skippable = HashSet::new();
        for path in current_hashes.keys() {
            if affected.contains(path) {
                continue;
            }
            if let Some(content) = current.get(path) {
                if cache.has_bundle(path, content) {
                    skippable.insert(path.clone());
                }
            }
        }

        self.previous_hashes = current_hashes;

        ChangeAnalysis {
            added,
            modified,
            deleted,
            skippable,
            affected,
            requires_full_rebuild,
            reason,
        }
    }

    /// `getBuildDecisions(currentFiles, analysis)` — spec.md §4.I.
    pub fn get_build_decisions(
        &self,
        current: &VirtualFilesystem,
        analysis: &ChangeAnalysis,
        cache: &mut BundleCache,
        graph: &mut DependencyGraph,
    ) -> Vec<FileBuildDecision> {
        let mut decisions = Vec::new();

        for path in current.paths() {
            let content = current.get(path).unwrap_or("");
            let reason = if analysis.added.contains(path) {
                BuildReason::New
            } else if analysis.modified.contains(path) {
                BuildReason::Changed
            } else if analysis.affected.contains(path) {
                BuildReason::DependencyChanged
            } else {
                BuildReason::Cached
            };

            let forced = analysis.requires_full_rebuild;
            let (rebuild, reason, cached_code, cached_css) = match reason {
                BuildReason::Cached if !forced => {
                    if let Some(bundle) = cache.get_bundle(path, content) {
                        (false, BuildReason::Cached, Some(bundle.code.clone()), bundle.css.clone())
                    } else {
                        // cache-miss-but-unchanged is treated as changed
                        (true, BuildReason::Changed, None, None)
                    }
                }
                other => (true, if forced && other == BuildReason::Cached { BuildReason::Changed } else { other }, None, None),
            };

            decisions.push(FileBuildDecision {
                path: path.clone(),
                rebuild,
                reason,
                cached_code,
                cached_css,
            });
        }

        for path in &analysis.deleted {
            cache.invalidate_bundle(path);
            graph.remove_file(path);
            decisions.push(FileBuildDecision {
                path: path.clone(),
                rebuild: false,
                reason: BuildReason::Deleted,
                cached_code: None,
                cached_css: None,
            });
        }

        decisions
    }

    /// `updateDependencyGraph(path, content, imports, npmDeps)` — invoked
    /// by the orchestrator after a successful per-file compile.
    pub fn update_dependency_graph(
        &self,
        graph: &mut DependencyGraph,
        path: &str,
        content: &str,
        imports: &[String],
        npm_dependencies: &[String],
    ) {
        graph.add_file(path, content, imports, npm_dependencies);
    }

    pub fn cache_bundle(
        &self,
        cache: &mut BundleCache,
        path: &str,
        content: &str,
        bundle: crate::cache::CachedBundle,
    ) {
        cache.set_bundle(path, content, bundle);
    }

    /// `completeBuild(rebuiltN, cachedN, wasFullRebuild)` — stamps
    /// `cacheHitRate`/`timeSavedEstimate`; `buildTimeMs` is filled in by
    /// the orchestrator, which alone knows the wall-clock duration.
    pub fn complete_build(&self, rebuilt: usize, cached: usize) -> BuildMetrics {
        let total = rebuilt + cached;
        let cache_hit_rate = if total == 0 {
            0.0
        } else {
            cached as f64 / total as f64
        };
        BuildMetrics {
            cache_hit_rate,
            time_saved_estimate_ms: (cached as u64) * 50,
            build_time_ms: 0,
        }
    }
}
