//! Bundle Worker — redesigned native backend (spec.md §4.G, DESIGN.md).
//!
//! spec.md describes esbuild-wasm as the bundling backend. This crate is
//! native Rust and the teacher repo never wires up esbuild itself, so the
//! backend here is the teacher's actual `oxc_*` stack (`transform.rs`:
//! `oxc_parser` + `oxc_semantic` + `oxc_transformer` + `oxc_codegen`): each
//! file is parsed and transformed (TypeScript types stripped, JSX lowered
//! to `createElement`/automatic-runtime calls) independently, then linked
//! by a small hand-written module-registry runtime.
//!
//! Linking is textual rather than AST-level: a regex pass rewrites each
//! transformed module's `import`/`export` statements into calls against
//! the registry's `__require`/`module.exports`, the same technique
//! `transform_simple.rs::extract_imports_exports` already uses to scan
//! import/export statements without a full resolver pass. This is a
//! preview-build bundler (spec.md §1 Non-goals: "not final artifact
//! fidelity"), not a faithful ESM linker — arbitrary re-export forms and
//! live-binding semantics are out of scope.

use std::path::Path;

use once_cell::sync::Lazy;
use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_diagnostics::OxcDiagnostic;
use oxc_minifier::{CompressOptions, MangleOptions, Minifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use regex::Regex;

use super::{BuildPayload, BuildResult};
use crate::resolver::{loader_for_extension, Loader};
use crate::types::{Diagnostic, JsxMode};

static DEFAULT_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"import\s+(\w+)\s+from\s+["']([^"']+)["'];?"#).unwrap());
static NAMED_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s*\{\s*([^}]+)\s*\}\s*from\s+["']([^"']+)["'];?"#).unwrap()
});
static NAMESPACE_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"import\s+\*\s+as\s+(\w+)\s+from\s+["']([^"']+)["'];?"#).unwrap());
static EXPORT_DEFAULT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"export\s+default\s+").unwrap());
static EXPORT_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"export\s+(const|let|var|function|class)\s+(\w+)").unwrap());
static EXPORT_NAMED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"export\s*\{\s*([^}]+)\s*\};?").unwrap());

/// Parses and transforms one source file: TypeScript types stripped, JSX
/// lowered, import/export syntax left intact for the linker's textual
/// rewrite pass below.
pub fn transform_source(path: &str, source: &str, _jsx_automatic: bool) -> (String, Vec<Diagnostic>) {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(Path::new(path)).unwrap_or_default();

    let parser_ret = Parser::new(&allocator, source, source_type).parse();
    let mut diagnostics: Vec<Diagnostic> = parser_ret
        .errors
        .iter()
        .map(|e| diagnostic_from_oxc(e, source, path))
        .collect();

    let mut program = parser_ret.program;

    // Semantic info is required by the transformer (scope/symbol
    // resolution for the TS-type-stripping and JSX-lowering passes).
    let _semantic_ret = SemanticBuilder::new().build(&program);

    let transform_options = TransformOptions::default();
    let transformer_ret = Transformer::new(&allocator, Path::new(path), source_type)
        .build(transform_options, &mut program);

    if !transformer_ret.errors.is_empty() {
        diagnostics.extend(
            transformer_ret
                .errors
                .iter()
                .map(|e| diagnostic_from_oxc(e, source, path)),
        );
    }

    let codegen_ret = Codegen::new().build(&program);
    (codegen_ret.code, diagnostics)
}

/// Builds a spec.md §4.G `{message, file, line, column, snippet}`
/// diagnostic out of an `oxc_diagnostics::OxcDiagnostic`. Spans aren't
/// exposed on the public error type, so the byte offset is recovered from
/// its `Debug` rendering the same way
/// `infrastructure/processors/minifier.rs::OxcMinifier::create_parse_error_context`
/// does, then converted to a 1-based line/0-based column and a
/// two-line-of-context snippet.
fn diagnostic_from_oxc(err: &OxcDiagnostic, source: &str, path: &str) -> Diagnostic {
    let mut diagnostic = Diagnostic::new(err.to_string()).with_file(path);
    if let Some(offset) = extract_span_offset(&format!("{err:?}")) {
        let (line, column) = byte_offset_to_line_col(source, offset);
        diagnostic = diagnostic
            .with_location(line, column)
            .with_snippet(code_snippet_around(source, line, 2));
    }
    diagnostic
}

fn extract_span_offset(debug_str: &str) -> Option<usize> {
    let offset_idx = debug_str.find("offset: SourceOffset(")?;
    let after_offset = &debug_str[offset_idx + "offset: SourceOffset(".len()..];
    let digits: String = after_offset.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<usize>().ok()
}

fn byte_offset_to_line_col(content: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 0;
    let mut offset = 0;
    for ch in content.chars() {
        if offset >= byte_offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
        offset += ch.len_utf8();
    }
    (line, col)
}

fn code_snippet_around(content: &str, error_line: usize, context_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let start = error_line.saturating_sub(context_lines + 1);
    let end = (error_line + context_lines).min(total);
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

/// One module, ready to be linked: its registry id, its transformed
/// source, and the specifiers it imports (unresolved — the caller
/// supplies a resolver).
pub struct LinkableModule {
    pub id: String,
    pub code: String,
}

/// Rewrites a transformed module's ESM syntax into calls against the
/// registry runtime's `__require`/`module`/`exports` bindings.
fn rewrite_module_syntax(code: &str, resolve: &impl Fn(&str) -> String) -> String {
    let mut out = code.to_string();

    out = DEFAULT_IMPORT_RE
        .replace_all(&out, |c: &regex::Captures| {
            format!(
                "const {} = __require({:?}).default;",
                &c[1],
                resolve(&c[2])
            )
        })
        .to_string();

    out = NAMESPACE_IMPORT_RE
        .replace_all(&out, |c: &regex::Captures| {
            format!("const {} = __require({:?});", &c[1], resolve(&c[2]))
        })
        .to_string();

    out = NAMED_IMPORT_RE
        .replace_all(&out, |c: &regex::Captures| {
            let bindings: Vec<String> = c[1]
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();
            format!(
                "const {{ {} }} = __require({:?});",
                bindings.join(", "),
                resolve(&c[2])
            )
        })
        .to_string();

    out = EXPORT_DEFAULT_RE
        .replace_all(&out, "module.exports.default = ")
        .to_string();

    // `export const NAME = ...` keeps the declaration and appends an
    // assignment line after the statement; naive but sufficient for a
    // preview bundler (spec.md §1: "not final artifact fidelity").
    let mut rewritten_exports = String::with_capacity(out.len());
    let mut export_names = Vec::new();
    for line in out.lines() {
        if let Some(caps) = EXPORT_DECL_RE.captures(line) {
            let name = caps[2].to_string();
            let stripped = EXPORT_DECL_RE.replace(line, "$1 $2");
            rewritten_exports.push_str(&stripped);
            rewritten_exports.push('\n');
            export_names.push(name);
        } else if let Some(caps) = EXPORT_NAMED_RE.captures(line) {
            for binding in caps[1].split(',') {
                let name = binding.trim().split(" as ").next().unwrap_or("").trim();
                if !name.is_empty() {
                    export_names.push(name.to_string());
                }
            }
        } else {
            rewritten_exports.push_str(line);
            rewritten_exports.push('\n');
        }
    }
    for name in export_names {
        rewritten_exports.push_str(&format!("module.exports.{name} = {name};\n"));
    }

    rewritten_exports
}

/// Wraps every module into the registry runtime's factory-function shape
/// and invokes the entry module, the standard single-file bundled-output
/// convention (`__modules`/`__require`).
pub fn link_modules(modules: &[LinkableModule], entry_id: &str) -> String {
    let mut out = String::new();
    out.push_str("(function(){\n");
    out.push_str("var __modules = {};\nvar __cache = {};\n");
    out.push_str(
        "function __require(id){\n  if (__cache[id]) return __cache[id].exports;\n  var module = { exports: {} };\n  __cache[id] = module;\n  __modules[id](module, module.exports, __require);\n  return module.exports;\n}\n",
    );
    for module in modules {
        out.push_str(&format!(
            "__modules[{:?}] = function(module, exports, __require) {{\n{}\n}};\n",
            module.id, module.code
        ));
    }
    out.push_str(&format!("__require({entry_id:?});\n"));
    out.push_str("})();\n");
    out
}

/// Wraps a non-JS asset (JSON, plain text, image) into a module whose
/// default export is the loaded value, the same contract the virtual-fs
/// plugin's loader table gives esbuild (spec.md §4.F "Load rule").
fn wrap_asset_module(path: &str, source: &str, loader: &Loader) -> String {
    let default_value = match loader {
        Loader::Json => source.trim().to_string(),
        Loader::DataUrl => format!("{:?}", crate::resolver::virtual_fs::to_data_url(path, source.as_bytes())),
        _ => format!("{:?}", source),
    };
    let mut code = format!("module.exports.default = {default_value};\n");
    if matches!(loader, Loader::Json) {
        code.push_str("if (module.exports.default && typeof module.exports.default === \"object\") { Object.assign(module.exports, module.exports.default); }\n");
    }
    code
}

/// Extensions a framework compiler (spec.md §4.E) owns and always replaces
/// with JS before the file reaches the worker.
fn is_framework_source_extension(path: &str) -> bool {
    path.to_lowercase().ends_with(".vue")
}

/// Runs the full per-file transform + link pipeline for a `BuildPayload`,
/// the native replacement for an esbuild `build()` call (spec.md §4.G).
///
/// Only files whose loader is JS-family (spec.md §4.F: `ts, tsx, jsx, js`)
/// go through the oxc parse/transform pipeline; `css` files are collected
/// into the result's `css` field instead of being linked as JS modules
/// (spec.md §4.J step 5: "Merge worker-returned code/css with the
/// aggregator's CSS"), and every other loader (`json`, `text`, `dataurl`)
/// becomes a small module whose default export is the loaded value, so a
/// project that happens to include a `package.json` or an imported
/// `.json`/image asset alongside its TSX sources doesn't get fed through a
/// JavaScript parser.
///
/// `resolve` maps an import specifier, seen while linking the module at
/// `importer_id`, to the registry id of the module it targets.
pub fn run_build(
    payload: &BuildPayload,
    resolve: impl Fn(&str, &str) -> Option<String>,
) -> BuildResult {
    let started = std::time::Instant::now();
    let jsx_automatic = matches!(payload.jsx.jsx, JsxMode::Automatic);

    let mut modules = Vec::new();
    let mut errors = Vec::new();
    let warnings = Vec::new();
    let mut css_fragments = Vec::new();

    for (path, source) in &payload.files {
        let loader = loader_for_extension(path);
        // A framework source file (`.vue`) never reaches the worker in its
        // original syntax: by the time the engine builds a
        // payload, its compiler stage has already replaced the file's
        // content with compiled JS under the same path (spec.md §4.E/§4.J).
        // `loader_for_extension` still classifies the path by its original
        // extension, so those paths need to be treated as JS-family here too.
        let is_js_family = matches!(loader, Loader::Ts | Loader::Tsx | Loader::Js | Loader::Jsx)
            || is_framework_source_extension(path);

        if matches!(loader, Loader::Css) {
            if !source.trim().is_empty() {
                css_fragments.push((path.clone(), source.clone()));
            }
            modules.push(LinkableModule {
                id: path.clone(),
                code: String::new(),
            });
            continue;
        }

        let linked_body = if is_js_family {
            let (transformed, diagnostics) = transform_source(path, source, jsx_automatic);
            errors.extend(diagnostics);
            let resolve_for_module = |specifier: &str| {
                resolve(specifier, path).unwrap_or_else(|| specifier.to_string())
            };
            rewrite_module_syntax(&transformed, &resolve_for_module)
        } else {
            wrap_asset_module(path, source, &loader)
        };

        modules.push(LinkableModule {
            id: path.clone(),
            code: linked_body,
        });
    }

    let code = if errors.is_empty() {
        link_modules(&modules, &payload.bootstrap_entry)
    } else {
        String::new()
    };

    let code = if payload.minify { minify(&code) } else { code };

    css_fragments.sort_by(|a, b| a.0.cmp(&b.0));
    let css = css_fragments
        .into_iter()
        .map(|(_, content)| content)
        .collect::<Vec<_>>()
        .join("\n");

    BuildResult {
        code,
        css,
        errors,
        warnings,
        build_time_ms: started.elapsed().as_millis() as u64,
    }
}

/// Re-parses the linked IIFE and runs it through `oxc_minifier` +
/// `Codegen`'s minified printer, the same two-step
/// `Minifier::minify`/`Codegen::with_options(minify: true)` shape
/// `infrastructure/processors/minifier.rs::OxcMinifier::minify` uses. Falls
/// back to the unminified code if the linked output fails to re-parse,
/// since a preview build should degrade, not fail, on a minify hiccup.
fn minify(code: &str) -> String {
    let allocator = Allocator::default();
    let source_type = SourceType::from_path(Path::new("/__bundle__.js")).unwrap_or_default();
    let parser_ret = Parser::new(&allocator, code, source_type).parse();
    if !parser_ret.errors.is_empty() {
        return code.to_string();
    }

    let mut program = parser_ret.program;
    let minifier_options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::default()),
    };
    let _ = Minifier::new(minifier_options).minify(&allocator, &mut program);

    let codegen_options = CodegenOptions {
        minify: true,
        ..Default::default()
    };
    Codegen::new()
        .with_options(codegen_options)
        .build(&program)
        .code
}
