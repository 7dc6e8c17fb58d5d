//! `soku-web` — an in-browser incremental build engine, minus the browser.
//!
//! This crate implements the four coupled subsystems spec.md describes
//! (dependency graph + bundle cache + incremental planner, module resolver,
//! framework compiler registry, CSS aggregator) plus the bundle worker that
//! coordinates with them, behind one public entry point: [`Engine`].
//!
//! See `DESIGN.md` for the grounding ledger and `SPEC_FULL.md` for the full
//! requirements this crate implements.

pub mod cache;
pub mod cli;
pub mod compilers;
pub mod config;
pub mod css_aggregator;
pub mod engine;
pub mod graph;
pub mod hash;
pub mod planner;
pub mod resolver;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::EngineOptions;
pub use engine::{BuildRequest, Engine, EngineStats};
pub use types::{BuildMode, BuildOutput, Diagnostic, JsxConfig, JsxMode, VirtualFilesystem};
pub use utils::{Result, SokuWebError};
