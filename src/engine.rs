//! Component J — Build Orchestrator (spec.md §4.J).
//!
//! The public entry point. Owns the three singletons (Dependency Graph,
//! Bundle Cache, CSS Aggregator) plus the Incremental Planner and Worker
//! Manager, the way the teacher's `core/services.rs::UltraBuildService`
//! composes its collaborators behind one constructor rather than exposing
//! them individually.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache::{BundleCache, CachedBundle};
use crate::compilers::CompilerRegistry;
use crate::config::EngineOptions;
use crate::css_aggregator::CssAggregator;
use crate::graph::DependencyGraph;
use crate::hash::hash_base36;
use crate::planner::IncrementalPlanner;
use crate::resolver::virtual_fs::VirtualFsResolver;
use crate::resolver::extract_import_specifiers;
use crate::types::{BuildMetrics, BuildMode, BuildOutput, Diagnostic, JsxConfig, VirtualFilesystem};
use crate::utils::{Logger, Result};
use crate::worker::manager::WorkerManager;
use crate::worker::BuildPayload;

pub struct BuildRequest {
    pub files: VirtualFilesystem,
    pub entry: String,
    pub mode: BuildMode,
    pub minify: bool,
    pub jsx: Option<JsxConfig>,
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub metrics: BuildMetrics,
    pub cache: crate::cache::CacheStats,
    pub graph_size: usize,
}

/// A progress callback invoked at the fixed phases spec.md §4.J names:
/// `bundling(20) → bundling(60) → bundling(80) → complete(100)`.
pub type ProgressCallback<'a> = dyn Fn(&str, u8) + Send + Sync + 'a;

pub struct Engine {
    options: EngineOptions,
    graph: DependencyGraph,
    cache: BundleCache,
    aggregator: CssAggregator,
    planner: IncrementalPlanner,
    compilers: CompilerRegistry,
    worker: WorkerManager,
    last_metrics: BuildMetrics,
    last_code: Option<String>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let worker = match options.cdn_base_override.clone() {
            Some(base) => WorkerManager::with_cdn_base(base),
            None => WorkerManager::new(),
        };
        Self {
            cache: BundleCache::new(
                options.cache_max_entries,
                options.cache_max_memory_bytes,
                options.cache_ttl_ms,
            ),
            options,
            graph: DependencyGraph::new(),
            aggregator: CssAggregator::new(),
            planner: IncrementalPlanner::new(),
            compilers: CompilerRegistry::default(),
            worker,
            last_metrics: BuildMetrics::default(),
            last_code: None,
        }
    }

    /// `build({files, entry, mode, minify, jsx})` — spec.md §6.
    pub async fn build(&mut self, request: BuildRequest) -> Result<BuildOutput> {
        self.build_with_progress(request, None).await
    }

    /// Same as [`Engine::build`], but invokes `on_progress` at the fixed
    /// phases spec.md §4.J names: `bundling(20) → bundling(60) →
    /// bundling(80) → complete(100)`.
    pub async fn build_with_progress(
        &mut self,
        request: BuildRequest,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> Result<BuildOutput> {
        let started = std::time::Instant::now();

        if is_vanilla_html_entry(&request.entry) {
            let result = self.build_html_project(&request, started);
            if let Some(cb) = on_progress {
                cb("complete", 100);
            }
            return result;
        }

        self.compilers.init_all().await?;

        let mut errors: Vec<Diagnostic> = Vec::new();
        let mut warnings: Vec<Diagnostic> = Vec::new();
        let mut overrides: HashMap<String, String> = HashMap::new();

        let mut paths: Vec<&String> = request.files.paths().collect();
        paths.sort();
        for path in paths {
            let Some(compiler) = self.compilers.find_for(path) else {
                continue;
            };
            let content = request.files.get(path).unwrap_or("");
            match compiler.compile(content, path) {
                Ok(output) => {
                    if !output.code.is_empty() {
                        overrides.insert(path.clone(), output.code);
                    }
                    if let (Some(css), Some(meta)) = (output.css, output.css_metadata) {
                        self.aggregator.add_css(path, css, meta.entry_type, meta.scope_id);
                    }
                    warnings.extend(output.warnings.into_iter().map(Diagnostic::new));
                }
                Err(err) => {
                    Logger::warn(&format!("compiler failed for {path}: {err}"));
                    errors.push(Diagnostic::new(err.to_string()).with_file(path.clone()));
                }
            }
        }

        if let Some(cb) = on_progress {
            cb("bundling", 20);
        }

        let analysis = self.planner.analyze_changes(&request.files, &self.graph, &mut self.cache);
        let decisions =
            self.planner
                .get_build_decisions(&request.files, &analysis, &mut self.cache, &mut self.graph);

        let rebuilt_count = decisions.iter().filter(|d| d.rebuild).count();
        let cached_count = decisions.iter().filter(|d| !d.rebuild && d.reason == crate::planner::BuildReason::Cached).count();

        let needs_worker = analysis.requires_full_rebuild || rebuilt_count > 0;

        if let Some(cb) = on_progress {
            cb("bundling", 60);
        }

        let (code, worker_css) = if needs_worker {
            let jsx = request.jsx.clone().unwrap_or_else(|| self.options.jsx.clone());
            let bootstrap_entry = request.entry.clone();
            let bootstrap_source = format!(
                "import __entry from \"{bootstrap_entry}\";\nif (typeof __entry === \"function\") {{ __entry(); }}\n"
            );
            let mut files: HashMap<String, String> = HashMap::new();
            for path in request.files.paths() {
                let content = overrides
                    .get(path)
                    .cloned()
                    .or_else(|| request.files.get(path).map(|s| s.to_string()))
                    .unwrap_or_default();
                files.insert(path.clone(), content);
            }
            files.insert("/__bootstrap__.tsx".to_string(), bootstrap_source);

            let payload = BuildPayload {
                files,
                bootstrap_entry: "/__bootstrap__.tsx".to_string(),
                entry_dir: parent_dir(&request.entry),
                minify: request.minify,
                sourcemap: request.mode == BuildMode::Development,
                mode: request.mode.as_str().to_string(),
                jsx,
            };

            let build_result = self.worker.build(payload).await?;
            errors.extend(build_result.errors);
            warnings.extend(build_result.warnings);
            (build_result.code, build_result.css)
        } else {
            (self.last_code.clone().unwrap_or_default(), String::new())
        };

        for path in request.files.paths() {
            if let Some(content) = request.files.get(path) {
                // Scan whatever content actually reaches the bundler (the
                // compiled override for a `.vue`/Tailwind source, the raw
                // source otherwise) so the graph's edges reflect the
                // imports the build genuinely has, not the pre-compile text.
                let scanned = overrides.get(path).map(|s| s.as_str()).unwrap_or(content);
                let (imports, npm_dependencies) =
                    classify_specifiers(scanned, path, &request.files);
                self.planner.update_dependency_graph(
                    &mut self.graph,
                    path,
                    content,
                    &imports,
                    &npm_dependencies,
                );
                if !errors.iter().any(|e| e.file.as_deref() == Some(path.as_str())) {
                    self.planner.cache_bundle(
                        &mut self.cache,
                        path,
                        content,
                        CachedBundle {
                            code: overrides.get(path).cloned().unwrap_or_else(|| content.to_string()),
                            css: None,
                            source_map: None,
                            imports: imports.clone(),
                            npm_dependencies: npm_dependencies.clone(),
                            byte_size: content.len(),
                        },
                    );
                }
            }
        }

        if let Some(cb) = on_progress {
            cb("bundling", 80);
        }

        let aggregated_css = self.aggregator.aggregate();
        let css = if worker_css.trim().is_empty() {
            aggregated_css
        } else if aggregated_css.is_empty() {
            worker_css
        } else {
            format!("{aggregated_css}\n{worker_css}")
        };
        let mut metrics = self.planner.complete_build(rebuilt_count, cached_count);
        metrics.build_time_ms = started.elapsed().as_millis() as u64;
        self.last_metrics = metrics;
        self.last_code = Some(code.clone());

        let combined_hash = hash_base36(&format!("{code}{css}"));

        if let Some(cb) = on_progress {
            cb("complete", 100);
        }

        Ok(BuildOutput {
            code,
            css,
            errors,
            warnings,
            hash: combined_hash,
            build_time_ms: self.last_metrics.build_time_ms,
        })
    }

    /// Vanilla HTML projects take a separate code path (spec.md §4.J):
    /// referenced CSS/JS files are inlined into a single document and no
    /// worker call is made. HTML is never parsed beyond extracting
    /// `<script src>`/`<link href>` references (spec.md §9, Open Question
    /// iii — a real sanitizer is explicitly out of scope here).
    fn build_html_project(
        &mut self,
        request: &BuildRequest,
        started: std::time::Instant,
    ) -> Result<BuildOutput> {
        static SCRIPT_SRC_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r#"<script[^>]+src=["']([^"']+)["'][^>]*>"#).unwrap());
        static LINK_HREF_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"<link[^>]+rel=["']stylesheet["'][^>]*href=["']([^"']+)["'][^>]*>"#)
                .unwrap()
        });

        let html = request.files.get(&request.entry).unwrap_or("").to_string();
        let mut code = String::new();
        for caps in SCRIPT_SRC_RE.captures_iter(&html) {
            if let Some(content) = request.files.get(&caps[1]) {
                if !code.is_empty() {
                    code.push('\n');
                }
                code.push_str(content);
            }
        }

        let mut css = String::new();
        for caps in LINK_HREF_RE.captures_iter(&html) {
            if let Some(content) = request.files.get(&caps[1]) {
                if !css.is_empty() {
                    css.push('\n');
                }
                css.push_str(content);
            }
        }

        let combined_hash = hash_base36(&format!("{code}{css}"));
        let build_time_ms = started.elapsed().as_millis() as u64;
        self.last_metrics.build_time_ms = build_time_ms;
        Ok(BuildOutput {
            code,
            css,
            errors: vec![],
            warnings: vec![],
            hash: combined_hash,
            build_time_ms,
        })
    }

    /// `reset()` — clears all singleton state.
    pub async fn reset(&mut self) {
        self.graph = DependencyGraph::new();
        self.cache.clear();
        self.aggregator.clear();
        self.planner = IncrementalPlanner::new();
        self.last_metrics = BuildMetrics::default();
        self.last_code = None;
        self.worker.dispose().await;
    }

    /// `getStats() -> {metrics, cache, graph}` — spec.md §6.
    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            metrics: self.last_metrics,
            cache: self.cache.get_stats(),
            graph_size: self.graph.len(),
        }
    }
}

/// Splits every specifier a file imports into intra-project paths
/// (resolved against the virtual filesystem, spec.md §4.F) and bare npm
/// specifiers (spec.md §3 `npmDependencies`), the classification
/// `addFile`/`hasNpmDependenciesChanged` (spec.md §4.B) need to track
/// dependency edges and detect an `npm install` worth of change.
fn classify_specifiers(
    source: &str,
    importer: &str,
    fs: &VirtualFilesystem,
) -> (Vec<String>, Vec<String>) {
    let resolver = VirtualFsResolver::new(fs);
    let mut imports = Vec::new();
    let mut npm_dependencies = Vec::new();
    for specifier in extract_import_specifiers(source) {
        if specifier.starts_with('.') || specifier.starts_with('/') || specifier.starts_with("@/")
        {
            if let Some(resolved) = resolver.resolve(&specifier, importer) {
                imports.push(resolved);
            }
        } else {
            npm_dependencies.push(specifier);
        }
    }
    imports.sort();
    imports.dedup();
    npm_dependencies.sort();
    npm_dependencies.dedup();
    (imports, npm_dependencies)
}

fn is_vanilla_html_entry(entry: &str) -> bool {
    entry.to_lowercase().ends_with(".html")
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) if idx > 0 => path[..idx].to_string(),
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_build_of_a_single_tsx_file_invokes_the_worker() {
        let mut engine = Engine::new(EngineOptions::default());
        let mut files = VirtualFilesystem::new();
        files.insert("/src/main.tsx", "export default () => 1;");
        let result = engine
            .build(BuildRequest {
                files,
                entry: "/src/main.tsx".to_string(),
                mode: BuildMode::Development,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();
        assert!(result.errors.is_empty());
        assert!(!result.code.is_empty());
    }

    #[tokio::test]
    async fn cdn_base_override_builds_a_project_with_no_bare_imports_unaffected() {
        // A project that never reaches the CDN resolver builds identically
        // regardless of `cdn_base_override` — this only proves the override
        // plumbs through `Engine::new` without breaking unrelated builds.
        let mut options = EngineOptions::default();
        options.cdn_base_override = Some("http://127.0.0.1:0".to_string());
        let mut engine = Engine::new(options);
        let mut files = VirtualFilesystem::new();
        files.insert("/src/main.tsx", "export default () => 1;");
        let result = engine
            .build(BuildRequest {
                files,
                entry: "/src/main.tsx".to_string(),
                mode: BuildMode::Development,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();
        assert!(result.errors.is_empty());
        assert!(!result.code.is_empty());
    }

    #[tokio::test]
    async fn vanilla_html_project_inlines_referenced_assets_without_a_worker_call() {
        let mut engine = Engine::new(EngineOptions::default());
        let mut files = VirtualFilesystem::new();
        files.insert("/index.html", "<link rel=\"stylesheet\" href=\"/style.css\"><script src=\"/app.js\"></script>");
        files.insert("/style.css", "body{margin:0}");
        files.insert("/app.js", "console.log(1)");
        let result = engine
            .build(BuildRequest {
                files,
                entry: "/index.html".to_string(),
                mode: BuildMode::Production,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();
        assert!(result.code.contains("console.log(1)"));
        assert!(result.css.contains("margin:0"));
    }

    #[tokio::test]
    async fn repeated_identical_build_does_not_invoke_the_worker_for_unchanged_files() {
        let mut engine = Engine::new(EngineOptions::default());
        let mut files = VirtualFilesystem::new();
        files.insert("/src/main.tsx", "export default () => 1;");

        engine
            .build(BuildRequest {
                files: files.clone(),
                entry: "/src/main.tsx".to_string(),
                mode: BuildMode::Development,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();

        let stats_before = engine.get_stats();
        let second = engine
            .build(BuildRequest {
                files,
                entry: "/src/main.tsx".to_string(),
                mode: BuildMode::Development,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();
        assert!(second.errors.is_empty());
        assert!(engine.get_stats().cache.hits >= stats_before.cache.hits);
    }

    #[tokio::test]
    async fn editing_a_dependency_marks_its_unchanged_importer_dependency_changed_not_cached() {
        // Regression test: the graph must be populated with real import
        // edges so a changed leaf's reverse closure actually includes its
        // unchanged importer (spec.md §4.B/§4.I, scenario 3).
        let mut engine = Engine::new(EngineOptions::default());
        let mut v1 = VirtualFilesystem::new();
        v1.insert("/src/main.tsx", "import './lib'; export default () => 1;");
        v1.insert("/src/lib.ts", "export const x = 2;");
        engine
            .build(BuildRequest {
                files: v1,
                entry: "/src/main.tsx".to_string(),
                mode: BuildMode::Development,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();

        let node = engine.graph.get_file("/src/lib.ts").unwrap();
        assert!(node.imported_by.contains(&"/src/main.tsx".to_string()));

        let mut v2 = VirtualFilesystem::new();
        v2.insert("/src/main.tsx", "import './lib'; export default () => 1;");
        v2.insert("/src/lib.ts", "export const x = 3;");
        let analysis = engine
            .planner
            .analyze_changes(&v2, &engine.graph, &mut engine.cache);
        assert!(analysis.affected.contains("/src/main.tsx"));
    }

    #[tokio::test]
    async fn npm_dependency_recorded_in_the_graph_does_not_force_a_rebuild_every_time() {
        // Regression test: if the graph never records a file's npm
        // specifiers, `hasNpmDependenciesChanged` compares the current
        // package.json set against a permanently-empty recorded set and
        // forces a full rebuild on every single build.
        let mut engine = Engine::new(EngineOptions::default());
        let mut files = VirtualFilesystem::new();
        files.insert("/src/main.tsx", "import React from 'react'; export default () => 1;");
        files.insert("/package.json", r#"{"dependencies":{"react":"18.0.0"}}"#);

        engine
            .build(BuildRequest {
                files: files.clone(),
                entry: "/src/main.tsx".to_string(),
                mode: BuildMode::Development,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();

        let analysis = engine
            .planner
            .analyze_changes(&files, &engine.graph, &mut engine.cache);
        assert!(!analysis.requires_full_rebuild);
    }

    #[tokio::test]
    async fn progress_callback_fires_at_the_four_fixed_phases() {
        let mut engine = Engine::new(EngineOptions::default());
        let mut files = VirtualFilesystem::new();
        files.insert("/src/main.tsx", "export default () => 1;");
        let phases = std::sync::Mutex::new(Vec::new());
        engine
            .build_with_progress(
                BuildRequest {
                    files,
                    entry: "/src/main.tsx".to_string(),
                    mode: BuildMode::Development,
                    minify: false,
                    jsx: None,
                },
                Some(&|phase: &str, pct: u8| phases.lock().unwrap().push((phase.to_string(), pct))),
            )
            .await
            .unwrap();
        let recorded = phases.into_inner().unwrap();
        assert_eq!(
            recorded,
            vec![
                ("bundling".to_string(), 20),
                ("bundling".to_string(), 60),
                ("bundling".to_string(), 80),
                ("complete".to_string(), 100),
            ]
        );
    }

    #[tokio::test]
    async fn reset_clears_cache_and_graph() {
        let mut engine = Engine::new(EngineOptions::default());
        let mut files = VirtualFilesystem::new();
        files.insert("/src/main.tsx", "export default () => 1;");
        engine
            .build(BuildRequest {
                files,
                entry: "/src/main.tsx".to_string(),
                mode: BuildMode::Development,
                minify: false,
                jsx: None,
            })
            .await
            .unwrap();
        assert!(engine.get_stats().graph_size > 0);
        engine.reset().await;
        assert_eq!(engine.get_stats().graph_size, 0);
    }
}
