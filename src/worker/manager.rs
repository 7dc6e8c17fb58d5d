//! Worker Manager (spec.md §4.H).
//!
//! Owns the bundle worker as a background `tokio::task`, the "owned actor
//! plus channel" shape `infrastructure/hmr.rs` already uses for its
//! reload-notification task. Requests are correlated by a `uuid::Uuid` so
//! multiple in-flight `build()` callers share one worker without their
//! responses crossing.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use super::bundle_worker::run_build;
use super::{BuildPayload, BuildResult};
use crate::resolver::cdn::{is_cdn_internal, CdnClient};
use crate::resolver::virtual_fs::VirtualFsResolver;
use crate::resolver::extract_import_specifiers;
use crate::types::{Diagnostic, VirtualFilesystem};
use crate::utils::{Result, SokuWebError};

enum WorkerMessage {
    Build {
        id: Uuid,
        payload: BuildPayload,
        reply: oneshot::Sender<BuildResult>,
    },
    Dispose,
}

/// `isSupported()` / `init()` / `build()` / `dispose()` — spec.md §4.H.
/// `init()` is idempotent: concurrent callers share the same spawned task
/// via the `Mutex`-guarded `Option<Handle>`.
pub struct WorkerManager {
    handle: Mutex<Option<Handle>>,
    cdn: Arc<CdnClient>,
}

struct Handle {
    sender: mpsc::Sender<WorkerMessage>,
    task: tokio::task::JoinHandle<()>,
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerManager {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
            cdn: Arc::new(CdnClient::new()),
        }
    }

    /// Builds a manager whose CDN client targets `cdn_base` instead of the
    /// real `esm.sh` (`EngineOptions::cdn_base_override`, spec.md
    /// addendum — tests point this at a local mock).
    pub fn with_cdn_base(cdn_base: String) -> Self {
        Self {
            handle: Mutex::new(None),
            cdn: Arc::new(CdnClient::with_base(cdn_base)),
        }
    }

    pub fn is_supported(&self) -> bool {
        // Native: background execution is always available via tokio.
        true
    }

    /// Spawns the worker task if it is not already running.
    pub async fn init(&self) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(32);
        let cdn = self.cdn.clone();
        let task = tokio::spawn(worker_loop(rx, cdn));
        *guard = Some(Handle { sender: tx, task });
    }

    /// `build(payload)` — sends a correlated request to the worker and
    /// awaits its reply.
    pub async fn build(&self, payload: BuildPayload) -> Result<BuildResult> {
        self.init().await;
        let guard = self.handle.lock().await;
        let Some(handle) = guard.as_ref() else {
            return Err(SokuWebError::worker("worker is not running"));
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        handle
            .sender
            .send(WorkerMessage::Build {
                id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SokuWebError::worker("worker task is not accepting requests"))?;
        drop(guard);

        reply_rx.await.map_err(|_| SokuWebError::cancelled())
    }

    /// `dispose()` — terminates the worker task and clears its CDN module
    /// cache. Outstanding awaiters are rejected with `SokuWebError::Cancelled`
    /// rather than hanging (their `oneshot::Receiver` is dropped along with
    /// the task, which `build()` maps to the cancellation variant).
    pub async fn dispose(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.sender.send(WorkerMessage::Dispose).await;
            handle.task.abort();
        }
        self.cdn.dispose();
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<WorkerMessage>, cdn: Arc<CdnClient>) {
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Build { id, payload, reply } => {
                tracing::debug!(request_id = %id, "worker: running build");
                let result = execute_build(&payload, &cdn).await;
                let _ = reply.send(result);
            }
            WorkerMessage::Dispose => {
                cdn.dispose();
                break;
            }
        }
    }
}

/// Resolves one import specifier seen while linking `importer`, against
/// either the in-payload virtual filesystem or the CDN, mirroring the
/// plugin order spec.md §4.G specifies: `[virtual-fs, esm-sh]`.
///
/// `Ok(None)` means no resolution strategy applied (e.g. a relative import
/// that matched neither the virtual filesystem nor the CDN namespace) —
/// that is not an error. `Err` means a CDN fetch was attempted and failed
/// after exhausting its retry budget (spec.md §4.F/§7), which must surface
/// as a build diagnostic rather than silently falling through to the bare
/// specifier.
async fn resolve_specifier(
    specifier: &str,
    importer: &str,
    fs: &VirtualFilesystem,
    cdn: &CdnClient,
) -> Result<Option<String>> {
    if let Some(resolved) = VirtualFsResolver::new(fs).resolve(specifier, importer) {
        return Ok(Some(resolved));
    }
    if !specifier.starts_with('.') && !specifier.starts_with('/') {
        let url = cdn.resolve_bare(specifier);
        return match cdn.fetch(&url).await {
            Ok(module) => Ok(Some(module.final_url)),
            Err(err) => Err(SokuWebError::resolve(format!(
                "could not resolve package \"{specifier}\": {err}"
            ))),
        };
    } else if is_cdn_internal(specifier) {
        let url = crate::resolver::cdn::resolve_within_namespace_with_base(
            cdn.base(),
            specifier,
            importer,
        );
        return match cdn.fetch(&url).await {
            Ok(module) => Ok(Some(module.final_url)),
            Err(err) => Err(SokuWebError::resolve(format!(
                "could not resolve \"{specifier}\": {err}"
            ))),
        };
    }
    Ok(None)
}

async fn execute_build(payload: &BuildPayload, cdn: &Arc<CdnClient>) -> BuildResult {
    let mut fs = VirtualFilesystem::new();
    for (path, content) in &payload.files {
        fs.insert(path, content.clone());
    }

    // Pre-resolve every distinct specifier referenced anywhere in the
    // payload so `run_build`'s synchronous resolver closure can look them
    // up without blocking inside the oxc pass.
    let mut resolutions: std::collections::HashMap<(String, String), String> =
        std::collections::HashMap::new();
    let mut resolve_errors: Vec<Diagnostic> = Vec::new();
    for (path, content) in &payload.files {
        for specifier in extract_import_specifiers(content) {
            match resolve_specifier(&specifier, path, &fs, cdn).await {
                Ok(Some(resolved)) => {
                    resolutions.insert((path.clone(), specifier), resolved);
                }
                Ok(None) => {}
                Err(err) => {
                    resolve_errors.push(Diagnostic::new(err.to_string()).with_file(path.clone()));
                }
            }
        }
    }

    let mut result = run_build(payload, |specifier, importer| {
        resolutions
            .get(&(importer.to_string(), specifier.to_string()))
            .cloned()
    });
    result.errors.extend(resolve_errors);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_roundtrips_a_single_file_project() {
        let manager = WorkerManager::new();
        let mut files = std::collections::HashMap::new();
        files.insert(
            "/src/main.tsx".to_string(),
            "export default () => 1;".to_string(),
        );
        let payload = BuildPayload {
            files,
            bootstrap_entry: "/src/main.tsx".to_string(),
            entry_dir: "/src".to_string(),
            minify: false,
            sourcemap: false,
            mode: "development".to_string(),
            jsx: crate::types::JsxConfig::default(),
        };
        let result = manager.build(payload).await.unwrap();
        assert!(result.errors.is_empty());
        assert!(!result.code.is_empty());
        manager.dispose().await;
    }

    #[tokio::test]
    async fn a_bare_specifier_that_fails_cdn_resolution_surfaces_a_build_error() {
        // Points the CDN at an unreachable host so `cdn.fetch` exhausts its
        // retry budget and returns `Err` deterministically, without any
        // real network access.
        let manager = WorkerManager::with_cdn_base("http://127.0.0.1:1".to_string());
        let mut files = std::collections::HashMap::new();
        files.insert(
            "/src/main.tsx".to_string(),
            "import react from \"react\";\nexport default () => 1;".to_string(),
        );
        let payload = BuildPayload {
            files,
            bootstrap_entry: "/src/main.tsx".to_string(),
            entry_dir: "/src".to_string(),
            minify: false,
            sourcemap: false,
            mode: "development".to_string(),
            jsx: crate::types::JsxConfig::default(),
        };
        let result = manager.build(payload).await.unwrap();
        assert!(
            result.errors.iter().any(|e| e.message.contains("react")),
            "expected a diagnostic naming the unresolved package, got {:?}",
            result.errors
        );
        manager.dispose().await;
    }

    #[tokio::test]
    async fn dispose_leaves_the_manager_reusable_for_a_later_build() {
        // `dispose()` tears the worker task down and clears the handle;
        // `init()`'s `guard.is_some()` check means a later `build()` spawns
        // a fresh task rather than hanging against a dead one.
        let manager = WorkerManager::new();
        manager.init().await;
        manager.dispose().await;

        let mut files = std::collections::HashMap::new();
        files.insert(
            "/src/main.tsx".to_string(),
            "export default () => 1;".to_string(),
        );
        let payload = BuildPayload {
            files,
            bootstrap_entry: "/src/main.tsx".to_string(),
            entry_dir: "/src".to_string(),
            minify: false,
            sourcemap: false,
            mode: "development".to_string(),
            jsx: crate::types::JsxConfig::default(),
        };
        let result = manager.build(payload).await.unwrap();
        assert!(result.errors.is_empty());
    }
}
