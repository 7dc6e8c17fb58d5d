//! Components G & H — Bundle Worker and Worker Manager (spec.md §4.G-H).
//!
//! `bundle_worker` is the redesigned native backend (oxc-based parse +
//! transform + codegen, linked by a hand-written module registry) that
//! replaces spec.md's esbuild-wasm description — this crate is native
//! Rust, not wasm, and the teacher itself never wires up esbuild (see
//! DESIGN.md). `manager` keeps the wire-level request/response-by-id
//! contract spec.md describes, grounded on `infrastructure/hmr.rs`'s
//! actor-task-plus-channel pattern.

pub mod bundle_worker;
pub mod manager;

use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, JsxConfig};

/// `BuildPayload` (worker input) — spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPayload {
    pub files: std::collections::HashMap<String, String>,
    pub bootstrap_entry: String,
    pub entry_dir: String,
    pub minify: bool,
    pub sourcemap: bool,
    pub mode: String,
    pub jsx: JsxConfig,
}

/// `BuildResult` (worker output) — spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub code: String,
    pub css: String,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub build_time_ms: u64,
}
