//! Ambient module — engine-wide configuration (SPEC_FULL.md §3 addendum).
//!
//! Grounded on the teacher's `config.rs::Config`: a small, serde-backed
//! options struct the CLI and library entry points both construct and
//! pass down, rather than each component reading its own env vars.

use serde::{Deserialize, Serialize};

use crate::types::JsxConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    pub log_level: LogLevel,
    pub jsx: JsxConfig,
    /// Override for tests — points the CDN resolver at a local mock
    /// instead of `https://esm.sh`.
    pub cdn_base_override: Option<String>,
    pub cache_max_entries: usize,
    pub cache_max_memory_bytes: usize,
    pub cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            jsx: JsxConfig::default(),
            cdn_base_override: None,
            cache_max_entries: 200,
            cache_max_memory_bytes: 32 * 1024 * 1024,
            cache_ttl_ms: Some(10 * 60 * 1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_bundle_cache_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.cache_max_entries, 200);
        assert_eq!(options.cache_max_memory_bytes, 32 * 1024 * 1024);
        assert_eq!(options.cache_ttl_ms, Some(600_000));
    }
}
