//! Tailwind JIT compiler (spec.md §4.E).
//!
//! Mirrors the teacher's own CSS split: a "real" backend (`css.rs`,
//! lightningcss-based) that exists but is never wired into the pipeline,
//! versus `css_simple.rs`, the textual fallback that is actually called.
//! Here, `JitBackend` models the slot a real Tailwind JIT engine would
//! plug into; the only backend registered is the textual stripper, which
//! is what every `compile()` call actually runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{CompileOutput, CssMetadata, FrameworkCompiler};
use crate::css_aggregator::CssEntryType;
use crate::hash::content_hash;
use crate::utils::Result;

static TAILWIND_DIRECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@tailwind\s+[\w-]+\s*;?").unwrap());
static APPLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@apply[^;]*;").unwrap());

/// `needsCompilation(css)` — true when the source references any
/// Tailwind-specific at-rule.
pub fn needs_compilation(css: &str) -> bool {
    css.contains("@tailwind") || css.contains("@apply") || css.contains("@layer")
}

/// Slot for a real JIT backend. Not implemented: no real Tailwind JIT
/// engine is among this crate's dependencies, so the only registered
/// backend is the textual stripper below.
pub trait JitBackend: Send + Sync {
    fn compile(&self, css: &str, content_files: &[String]) -> Option<String>;
}

/// Global singleton init flag — Tailwind's JIT setup is shared process-wide
/// the way the teacher's plugin manager initializes once per process
/// rather than per call site.
static GLOBAL_INIT: OnceLock<()> = OnceLock::new();

/// Removes `@tailwind` directives, `@apply` at-rules, and unwraps balanced
/// `@layer` blocks via explicit brace counting (regex alone can't express
/// nested-brace matching).
fn strip_tailwind(css: &str) -> String {
    let without_apply = APPLY_RE.replace_all(css, "");
    let without_tailwind = TAILWIND_DIRECTIVE_RE.replace_all(&without_apply, "");
    unwrap_layers(&without_tailwind)
}

fn unwrap_layers(css: &str) -> String {
    // Walks byte offsets, but every offset used to slice `css` is either 0,
    // one past an ASCII `{`/`}` delimiter, or advanced by a whole char's
    // `len_utf8()` — never a raw `+= 1` over the byte array — so this never
    // lands mid-codepoint on non-ASCII input (e.g. `content: "→"`).
    let mut out = String::with_capacity(css.len());
    let mut idx = 0usize;
    while idx < css.len() {
        if css[idx..].starts_with("@layer") {
            let Some(rel_brace) = css[idx..].find('{') else {
                out.push_str(&css[idx..]);
                break;
            };
            let brace_start = idx + rel_brace;
            let body_start = brace_start + 1; // '{' is one ASCII byte
            let mut depth = 1;
            let mut close_at = None;
            for (offset, ch) in css[body_start..].char_indices() {
                match ch {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            close_at = Some(body_start + offset);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let (inner_end, next_idx) = match close_at {
                Some(pos) => (pos, pos + 1), // '}' is one ASCII byte
                None => (css.len(), css.len()),
            };
            let inner = &css[body_start..inner_end];
            out.push_str(inner.trim());
            out.push('\n');
            idx = next_idx;
        } else {
            let ch = css[idx..].chars().next().expect("idx < css.len()");
            out.push(ch);
            idx += ch.len_utf8();
        }
    }
    remove_empty_rules(&out)
}

static EMPTY_RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^{}]+\{\s*\}").unwrap());

fn remove_empty_rules(css: &str) -> String {
    EMPTY_RULE_RE.replace_all(css, "").to_string()
}

pub struct TailwindCompiler {
    // process-wide initialization marker; per-instance flag mirrors the
    // registry's "already initialized" fast path.
    initialized: AtomicBool,
}

impl TailwindCompiler {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
        }
    }

    /// `(sourceHash, contentHash)` cache key the orchestrator uses when
    /// memoizing compiled output — exposed so the engine/cache layer can
    /// build the key without duplicating the hashing here.
    pub fn cache_key(css: &str, content_files: &[String]) -> (u32, u32) {
        let source_hash = content_hash(css);
        let concatenated = content_files.join("\n");
        let content_hash = content_hash(&concatenated);
        (source_hash, content_hash)
    }
}

impl Default for TailwindCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameworkCompiler for TailwindCompiler {
    fn name(&self) -> &'static str {
        "tailwind"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".css"]
    }

    fn can_handle(&self, path: &str) -> bool {
        path.to_lowercase().ends_with(".css")
    }

    async fn init(&self) -> Result<()> {
        GLOBAL_INIT.get_or_init(|| ());
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn compile(&self, source: &str, _path: &str) -> Result<CompileOutput> {
        if !needs_compilation(source) {
            return Ok(CompileOutput {
                code: String::new(),
                css: Some(source.to_string()),
                css_metadata: Some(CssMetadata {
                    entry_type: CssEntryType::Base,
                    scope_id: None,
                }),
                warnings: vec![],
            });
        }

        // No real JIT backend is registered; fall back to the textual
        // stripper unconditionally (spec.md: "On JIT failure or absent
        // JIT module, fall back to a textual stripper").
        let stripped = strip_tailwind(source);
        Ok(CompileOutput {
            code: String::new(),
            css: Some(stripped),
            css_metadata: Some(CssMetadata {
                entry_type: CssEntryType::Tailwind,
                scope_id: None,
            }),
            warnings: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_tailwind_directives() {
        assert!(needs_compilation("@tailwind base;"));
        assert!(needs_compilation(".btn { @apply p-4; }"));
        assert!(needs_compilation("@layer components { .btn {} }"));
        assert!(!needs_compilation("body { margin: 0; }"));
    }

    #[test]
    fn strips_tailwind_and_apply_directives() {
        let css = "@tailwind base;\n@tailwind components;\n.btn { @apply p-4 text-white; }";
        let stripped = strip_tailwind(css);
        assert!(!stripped.contains("@tailwind"));
        assert!(!stripped.contains("@apply"));
    }

    #[test]
    fn unwraps_nested_layer_blocks() {
        let css = "@layer components { .btn { color: red; } @layer utilities { .x { color: blue; } } }";
        let stripped = strip_tailwind(css);
        assert!(!stripped.contains("@layer"));
        assert!(stripped.contains(".btn"));
        assert!(stripped.contains(".x"));
    }

    #[test]
    fn removes_rules_left_empty_after_apply_stripping() {
        let css = ".btn { @apply p-4; }\n.empty {}";
        let stripped = strip_tailwind(css);
        assert!(!stripped.contains(".empty {}"));
    }

    #[test]
    fn plain_css_passes_through_as_base_type() {
        let compiler = TailwindCompiler::new();
        let output = compiler.compile("body { margin: 0; }", "/a.css").unwrap();
        assert_eq!(output.css.unwrap(), "body { margin: 0; }");
        assert_eq!(
            output.css_metadata.unwrap().entry_type as u8,
            CssEntryType::Base as u8
        );
    }

    #[test]
    fn tailwind_css_is_tagged_with_the_tailwind_entry_type() {
        let compiler = TailwindCompiler::new();
        let output = compiler.compile("@tailwind base;", "/a.css").unwrap();
        assert_eq!(
            output.css_metadata.unwrap().entry_type as u8,
            CssEntryType::Tailwind as u8
        );
    }

    #[test]
    fn unicode_content_outside_and_inside_layer_blocks_does_not_panic() {
        let css = r#".icon::before { content: "→"; @apply p-4; }
@layer components { .café { content: "café"; } }"#;
        let stripped = strip_tailwind(css);
        assert!(!stripped.contains("@apply"));
        assert!(!stripped.contains("@layer"));
        assert!(stripped.contains('→'));
        assert!(stripped.contains("café"));
    }
}
