//! Shared data-model types used across components (spec.md §3), kept in
//! one place the way the teacher's `core/models.rs` centralizes its wire
//! types rather than scattering them per module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// In-memory mapping from absolute, normalized path to file text, supplied
/// by the caller once per build request. Never mutated by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualFilesystem {
    files: HashMap<String, String>,
}

/// `/path/to/file` — leading slash, forward slashes, no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let trimmed = replaced.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl VirtualFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<str>, content: impl Into<String>) {
        self.files.insert(normalize_path(path.as_ref()), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(&normalize_path(path)).map(|s| s.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(&normalize_path(path))
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Build mode: affects `define.process.env.NODE_ENV` and default minify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildMode {
    Development,
    Production,
}

impl BuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildMode::Development => "development",
            BuildMode::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsxMode {
    Transform,
    Automatic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsxConfig {
    pub jsx: JsxMode,
    pub jsx_import_source: Option<String>,
}

impl Default for JsxConfig {
    fn default() -> Self {
        Self {
            jsx: JsxMode::Automatic,
            jsx_import_source: Some("react".to_string()),
        }
    }
}

/// A single diagnostic surfaced from a compiler or the bundle worker
/// (spec.md §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub snippet: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            column: None,
            snippet: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_location(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// `{ code, css, errors, warnings, hash, buildTimeMs }` — the orchestrator's
/// public result (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutput {
    pub code: String,
    pub css: String,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub hash: String,
    pub build_time_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BuildMetrics {
    pub cache_hit_rate: f64,
    pub time_saved_estimate_ms: u64,
    pub build_time_ms: u64,
}
