//! CDN resolver plugin (spec.md §4.F).
//!
//! Resolves bare specifiers against `esm.sh`, deduplicates concurrent
//! fetches for the same URL (one in-flight request per URL, `dashmap` +
//! `futures::future::Shared` the way `infrastructure/hmr.rs` shares a
//! single broadcast channel across subscribers rather than spawning one
//! per caller), and rewrites CDN-internal relative imports to absolute
//! URLs so the bundler's subsequent resolves see concrete addresses.
//! Retries honor `Retry-After` on 429, exponential backoff otherwise
//! (spec.md §7, Fetch errors).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::{Result, SokuWebError};

pub const CDN_BASE: &str = "https://esm.sh";
const MAX_ATTEMPTS: u32 = 4;
const BASE_BACKOFF_MS: u64 = 200;

static RELATIVE_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"from\s+["'](/(?:\.\./)*[^"']+)["']"#).unwrap());
static SCOPED_OR_VERSIONED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/@?[^/]+@").unwrap());

/// `resolve_bare(specifier)` — bare specifier (not starting with `.` or
/// `/`) resolved to `{CDN}/{specifier}` in the `esm-sh` namespace.
pub fn resolve_bare(specifier: &str) -> String {
    resolve_bare_with_base(CDN_BASE, specifier)
}

pub fn resolve_bare_with_base(base: &str, specifier: &str) -> String {
    format!("{base}/{specifier}")
}

/// Whether a path encountered while already inside the `esm-sh` namespace
/// should be treated as CDN-internal navigation (spec.md §4.F).
pub fn is_cdn_internal(path: &str) -> bool {
    path.starts_with('/')
        || SCOPED_OR_VERSIONED_RE.is_match(path)
        || path.contains("/es2022/")
}

/// Resolves a specifier encountered while loading a module already served
/// from the CDN namespace, relative to the importing module's final URL.
pub fn resolve_within_namespace(specifier: &str, importer_url: &str) -> String {
    resolve_within_namespace_with_base(CDN_BASE, specifier, importer_url)
}

pub fn resolve_within_namespace_with_base(base: &str, specifier: &str, importer_url: &str) -> String {
    if specifier.starts_with("http://") || specifier.starts_with("https://") {
        return specifier.to_string();
    }
    if is_cdn_internal(specifier) {
        return format!("{base}{specifier}");
    }
    join_relative_url(importer_url, specifier)
}

fn join_relative_url(base: &str, relative: &str) -> String {
    let base_dir = match base.rfind('/') {
        Some(idx) => &base[..idx],
        None => base,
    };
    let mut segments: Vec<&str> = base_dir.split('/').collect();
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// `/from\s+["'](\/(\.\.\/)*[^"']+)["']/g` — each match is replaced with
/// the absolute URL resolved against `base_url` (spec.md §4.F, "Import
/// rewriting contract").
pub fn rewrite_relative_imports(code: &str, base_url: &str) -> String {
    rewrite_relative_imports_with_base(CDN_BASE, code, base_url)
}

pub fn rewrite_relative_imports_with_base(cdn_base: &str, code: &str, base_url: &str) -> String {
    RELATIVE_IMPORT_RE
        .replace_all(code, |caps: &regex::Captures| {
            let resolved = resolve_within_namespace_with_base(cdn_base, &caps[1], base_url);
            format!("from \"{resolved}\"")
        })
        .to_string()
}

#[derive(Debug, Clone)]
pub struct FetchedModule {
    pub code: Arc<str>,
    pub final_url: String,
}

type FetchFuture = Shared<BoxFuture<'static, std::result::Result<FetchedModule, String>>>;

/// Owns the worker's CDN module cache: one content cache keyed by both the
/// requested and final URL, and one in-flight table so concurrent imports
/// of the same module share a single HTTP request.
pub struct CdnClient {
    base: String,
    http: reqwest::Client,
    cache: DashMap<String, FetchedModule>,
    in_flight: DashMap<String, FetchFuture>,
}

impl Default for CdnClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CdnClient {
    pub fn new() -> Self {
        Self::with_base(CDN_BASE.to_string())
    }

    /// Builds a client against a non-default CDN base URL. Tests point
    /// this at a local mock server instead of the real `esm.sh`
    /// (`EngineOptions::cdn_base_override`, spec.md addendum).
    pub fn with_base(base: String) -> Self {
        Self {
            base,
            http: reqwest::Client::builder()
                .user_agent("soku-web/0.1")
                .build()
                .unwrap_or_default(),
            cache: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn resolve_bare(&self, specifier: &str) -> String {
        resolve_bare_with_base(&self.base, specifier)
    }

    pub fn dispose(&self) {
        self.cache.clear();
        self.in_flight.clear();
    }

    /// `fetch(url)` — deduplicated, retried fetch of a CDN module. The
    /// returned code has had its internal relative imports rewritten to
    /// absolute CDN URLs.
    pub async fn fetch(&self, url: &str) -> Result<FetchedModule> {
        if let Some(cached) = self.cache.get(url) {
            return Ok(cached.clone());
        }

        let shared = {
            if let Some(existing) = self.in_flight.get(url) {
                existing.clone()
            } else {
                let http = self.http.clone();
                let requested_url = url.to_string();
                let base = self.base.clone();
                let fut: BoxFuture<'static, std::result::Result<FetchedModule, String>> =
                    fetch_with_retry(http, requested_url, base).boxed();
                let shared = fut.shared();
                self.in_flight.insert(url.to_string(), shared.clone());
                shared
            }
        };

        let result = shared.await;
        self.in_flight.remove(url);

        match result {
            Ok(module) => {
                self.cache.insert(url.to_string(), module.clone());
                self.cache.insert(module.final_url.clone(), module.clone());
                Ok(module)
            }
            Err(message) => Err(SokuWebError::fetch(message, None)),
        }
    }
}

async fn fetch_with_retry(
    http: reqwest::Client,
    url: String,
    cdn_base: String,
) -> std::result::Result<FetchedModule, String> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match http.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let final_url = response.url().to_string();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| format!("failed to read response body: {e}"))?;
                    let rewritten = rewrite_relative_imports_with_base(&cdn_base, &body, &final_url);
                    return Ok(FetchedModule {
                        code: Arc::from(rewritten),
                        final_url,
                    });
                }

                if attempt >= MAX_ATTEMPTS {
                    return Err(format!("{url} responded with status {status}"));
                }

                let retry_after = if status.as_u16() == 429 {
                    response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                } else {
                    None
                };
                let backoff = retry_after
                    .unwrap_or_else(|| Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt)));
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(format!("fetch of {url} failed: {err}"));
                }
                tokio::time::sleep(Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt)))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_specifier_resolves_to_cdn_url() {
        assert_eq!(resolve_bare("react"), "https://esm.sh/react");
    }

    #[test]
    fn client_with_overridden_base_resolves_bare_specifiers_against_it() {
        let client = CdnClient::with_base("http://127.0.0.1:4000".to_string());
        assert_eq!(client.base(), "http://127.0.0.1:4000");
        assert_eq!(client.resolve_bare("react"), "http://127.0.0.1:4000/react");
    }

    #[test]
    fn versioned_scoped_path_is_cdn_internal() {
        assert!(is_cdn_internal("/react@18.2.0/es2022/react.mjs"));
        assert!(is_cdn_internal("/@vue/runtime-core@3.4.0/index.js"));
        assert!(!is_cdn_internal("lodash"));
    }

    #[test]
    fn rewrites_relative_cdn_imports_to_absolute_urls() {
        let code = r#"import x from "/react@18.2.0/es2022/react.mjs";"#;
        let rewritten = rewrite_relative_imports(code, "https://esm.sh/react@18.2.0");
        assert!(rewritten.contains("https://esm.sh/react@18.2.0/es2022/react.mjs"));
    }

    #[test]
    fn resolves_within_namespace_relative_to_importer() {
        let resolved = resolve_within_namespace("./chunk-abc.mjs", "https://esm.sh/react@18.2.0/es2022/react.mjs");
        assert_eq!(resolved, "https://esm.sh/react@18.2.0/es2022/chunk-abc.mjs");
    }

    #[tokio::test]
    async fn duplicate_concurrent_fetches_of_a_bad_host_both_fail_without_panicking() {
        let client = CdnClient::new();
        let url = "http://127.0.0.1:1/unreachable";
        let (a, b) = tokio::join!(client.fetch(url), client.fetch(url));
        assert!(a.is_err());
        assert!(b.is_err());
    }
}
