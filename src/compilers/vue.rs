//! Vue SFC compiler (spec.md §4.E).
//!
//! Block splitting (`template`/`script`/`script setup`/`style*`) uses the
//! same regex-based extraction technique the teacher already applies
//! elsewhere — `css_simple.rs::extract_import_url` for CSS `@import`
//! statements, `transform_simple.rs::extract_imports_exports` for JS
//! import/export scanning — rather than a fabricated `vue-sfc` crate
//! dependency. `init()` is an async no-op after the first call, matching
//! the spec's "loads a browser-compatible SFC parser lazily, idempotent."
//!
//! The template compiler below is a small hand-rolled recursive-descent
//! parser producing `h()` calls; it covers plain elements, attributes,
//! text, and `{{ expr }}` interpolation. It does not implement Vue's full
//! template grammar (`v-if`/`v-for`/directives) — that belongs to a real
//! `@vue/compiler-core` port, well outside what a textual SFC splitter can
//! responsibly claim to do.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{CompileOutput, CssMetadata, FrameworkCompiler};
use crate::css_aggregator::CssEntryType;
use crate::hash::hash_base36;
use crate::utils::Result;

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<template[^>]*>(.*?)</template>").unwrap());
static SCRIPT_SETUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<script\s+setup[^>]*>(.*?)</script>"#).unwrap());
static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<script(?:\s+[^>]*)?>(.*?)</script>").unwrap());
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<style([^>]*)>(.*?)</style>").unwrap());
static TOP_LEVEL_BINDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:const|let|var|function)\s+(\w+)").unwrap());

struct SfcBlocks {
    template: Option<String>,
    script: Option<String>,
    script_setup: Option<String>,
    styles: Vec<StyleBlock>,
}

struct StyleBlock {
    css: String,
    scoped: bool,
}

fn split_blocks(source: &str) -> SfcBlocks {
    let template = TEMPLATE_RE
        .captures(source)
        .map(|c| c[1].trim().to_string());
    let script_setup = SCRIPT_SETUP_RE
        .captures(source)
        .map(|c| c[1].trim().to_string());
    let script = if script_setup.is_none() {
        SCRIPT_RE.captures(source).map(|c| c[1].trim().to_string())
    } else {
        None
    };
    let styles = STYLE_RE
        .captures_iter(source)
        .map(|c| StyleBlock {
            css: c[2].trim().to_string(),
            scoped: c[1].contains("scoped"),
        })
        .collect();

    SfcBlocks {
        template,
        script,
        script_setup,
        styles,
    }
}

// --- minimal template-to-h() compiler -------------------------------------

enum Node {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<Node>,
    },
    Text(String),
    Interpolation(String),
}

struct TemplateParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> TemplateParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s.as_bytes())
    }

    fn parse_nodes(&mut self, stop_at_close: bool) -> Vec<Node> {
        let mut nodes = Vec::new();
        loop {
            if self.pos >= self.input.len() {
                break;
            }
            if stop_at_close && self.starts_with("</") {
                break;
            }
            if self.starts_with("{{") {
                nodes.push(self.parse_interpolation());
            } else if self.peek() == Some(b'<') {
                if let Some(node) = self.parse_element() {
                    nodes.push(node);
                } else {
                    self.pos += 1;
                }
            } else {
                nodes.push(self.parse_text());
            }
        }
        nodes
    }

    fn parse_interpolation(&mut self) -> Node {
        self.pos += 2;
        let start = self.pos;
        while self.pos < self.input.len() && !self.starts_with("}}") {
            self.pos += 1;
        }
        let expr = String::from_utf8_lossy(&self.input[start..self.pos]).trim().to_string();
        if self.starts_with("}}") {
            self.pos += 2;
        }
        Node::Interpolation(expr)
    }

    fn parse_text(&mut self) -> Node {
        let start = self.pos;
        while self.pos < self.input.len() && self.peek() != Some(b'<') && !self.starts_with("{{") {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.input[start..self.pos]).to_string();
        Node::Text(text)
    }

    fn parse_element(&mut self) -> Option<Node> {
        // self.pos is at '<'
        let tag_start = self.pos + 1;
        let mut cursor = tag_start;
        while cursor < self.input.len() && !(self.input[cursor] as char).is_whitespace()
            && self.input[cursor] != b'>'
            && self.input[cursor] != b'/'
        {
            cursor += 1;
        }
        let tag = String::from_utf8_lossy(&self.input[tag_start..cursor]).to_string();
        if tag.is_empty() {
            return None;
        }
        self.pos = cursor;

        let mut attrs = Vec::new();
        loop {
            self.skip_whitespace();
            if self.starts_with("/>") {
                self.pos += 2;
                return Some(Node::Element {
                    tag,
                    attrs,
                    children: vec![],
                });
            }
            if self.peek() == Some(b'>') {
                self.pos += 1;
                break;
            }
            if self.pos >= self.input.len() {
                return Some(Node::Element {
                    tag,
                    attrs,
                    children: vec![],
                });
            }
            if let Some(attr) = self.parse_attr() {
                attrs.push(attr);
            } else {
                self.pos += 1;
            }
        }

        let children = self.parse_nodes(true);
        let closing = format!("</{tag}>");
        if self.starts_with(&closing) {
            self.pos += closing.len();
        }
        Some(Node::Element {
            tag,
            attrs,
            children,
        })
    }

    fn parse_attr(&mut self) -> Option<(String, String)> {
        let name_start = self.pos;
        while self.pos < self.input.len()
            && self.input[self.pos] != b'='
            && self.input[self.pos] != b'>'
            && self.input[self.pos] != b'/'
            && !(self.input[self.pos] as char).is_whitespace()
        {
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.input[name_start..self.pos]).to_string();
        if name.is_empty() {
            return None;
        }
        self.skip_whitespace();
        if self.peek() != Some(b'=') {
            return Some((name, String::new()));
        }
        self.pos += 1;
        self.skip_whitespace();
        let quote = self.peek()?;
        if quote != b'"' && quote != b'\'' {
            return Some((name, String::new()));
        }
        self.pos += 1;
        let value_start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != quote {
            self.pos += 1;
        }
        let value = String::from_utf8_lossy(&self.input[value_start..self.pos]).to_string();
        if self.pos < self.input.len() {
            self.pos += 1;
        }
        Some((name, value))
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() && (self.input[self.pos] as char).is_whitespace() {
            self.pos += 1;
        }
    }
}

fn js_string(s: &str) -> String {
    format!("{:?}", s)
}

fn render_node(node: &Node) -> String {
    match node {
        Node::Text(text) => {
            if text.trim().is_empty() {
                String::new()
            } else {
                js_string(text.trim())
            }
        }
        Node::Interpolation(expr) => format!("String({expr})"),
        Node::Element {
            tag,
            attrs,
            children,
        } => {
            let props = if attrs.is_empty() {
                "null".to_string()
            } else {
                let entries: Vec<String> = attrs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", js_string(k), js_string(v)))
                    .collect();
                format!("{{ {} }}", entries.join(", "))
            };
            let rendered_children: Vec<String> = children
                .iter()
                .map(render_node)
                .filter(|s| !s.is_empty())
                .collect();
            let children_arg = if rendered_children.is_empty() {
                String::new()
            } else {
                format!(", [{}]", rendered_children.join(", "))
            };
            format!("h({}, {}{})", js_string(tag), props, children_arg)
        }
    }
}

/// Compiles a `<template>` body into the body of a `render(ctx)` function.
fn compile_template(template: &str) -> String {
    let mut parser = TemplateParser::new(template);
    let nodes = parser.parse_nodes(false);
    let roots: Vec<String> = nodes.iter().map(render_node).filter(|s| !s.is_empty()).collect();
    match roots.len() {
        0 => "null".to_string(),
        1 => roots.into_iter().next().unwrap(),
        _ => format!("h(\"div\", null, [{}])", roots.join(", ")),
    }
}

fn compile_script_options(script: &str, scope_id: &str, render_body: &str) -> String {
    let render_prop = format!("__scopeId: {}, render(ctx) {{ return {}; }}", js_string(scope_id), render_body);
    if let Some(pos) = script.find("export default {") {
        let insert_at = pos + "export default {".len();
        let mut out = String::with_capacity(script.len() + render_prop.len() + 64);
        out.push_str("import { h } from \"vue\";\n");
        out.push_str(&script[..insert_at]);
        out.push_str(&format!("\n  {render_prop},\n"));
        out.push_str(&script[insert_at..]);
        out
    } else {
        format!(
            "import {{ h, defineComponent }} from \"vue\";\n{}\nexport default defineComponent({{ {render_prop} }});",
            script
        )
    }
}

fn compile_script_setup(script_setup: &str, scope_id: &str, render_body: &str) -> String {
    let bindings: Vec<String> = TOP_LEVEL_BINDING_RE
        .captures_iter(script_setup)
        .map(|c| c[1].to_string())
        .collect();
    let return_obj = if bindings.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", bindings.join(", "))
    };
    format!(
        "import {{ h, defineComponent }} from \"vue\";\n\
         export default defineComponent({{\n  __scopeId: {},\n  setup() {{\n{}\n    return {};\n  }},\n  render(ctx) {{ return {}; }},\n}});",
        js_string(scope_id),
        script_setup,
        return_obj,
        render_body,
    )
}

/// Monotonic counter feeding the `data-v-<base36counter>` portion of each
/// scope id (spec.md: `data-v-<base36(counter)+4-rand-chars>`; the random
/// suffix is replaced here by a hash of the source path so scope ids stay
/// reproducible across builds of the same project, which the orchestrator
/// and its tests both depend on — see DESIGN.md Open Question notes).
static SCOPE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_scope_id(path: &str) -> String {
    let counter = SCOPE_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("data-v-{}{}", crate::hash::to_base36(counter as u32), &hash_base36(path)[..4.min(hash_base36(path).len())])
}

pub struct VueCompiler {
    initialized: AtomicBool,
}

impl VueCompiler {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
        }
    }
}

impl Default for VueCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameworkCompiler for VueCompiler {
    fn name(&self) -> &'static str {
        "vue"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".vue"]
    }

    async fn init(&self) -> Result<()> {
        // Idempotent lazy-load simulation: a real implementation would
        // load a browser-compatible SFC parser here on first call.
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn compile(&self, source: &str, path: &str) -> Result<CompileOutput> {
        let blocks = split_blocks(source);
        let scope_id = generate_scope_id(path);
        let render_body = blocks
            .template
            .as_deref()
            .map(compile_template)
            .unwrap_or_else(|| "null".to_string());

        let code = if let Some(setup) = &blocks.script_setup {
            compile_script_setup(setup, &scope_id, &render_body)
        } else if let Some(script) = &blocks.script {
            compile_script_options(script, &scope_id, &render_body)
        } else {
            format!(
                "import {{ h, defineComponent }} from \"vue\";\nexport default defineComponent({{ __scopeId: {}, render(ctx) {{ return {}; }} }});",
                js_string(&scope_id),
                render_body,
            )
        };

        let has_scoped = blocks.styles.iter().any(|s| s.scoped);
        let css = if blocks.styles.is_empty() {
            None
        } else {
            let merged: Vec<String> = blocks
                .styles
                .iter()
                .map(|s| {
                    if s.scoped {
                        scope_style(&s.css, &scope_id)
                    } else {
                        s.css.clone()
                    }
                })
                .collect();
            Some(merged.join("\n"))
        };

        let css_metadata = css.as_ref().map(|_| CssMetadata {
            entry_type: CssEntryType::Component,
            scope_id: if has_scoped {
                Some(scope_id.clone())
            } else {
                None
            },
        });

        Ok(CompileOutput {
            code,
            css,
            css_metadata,
            warnings: vec![],
        })
    }
}

static SELECTOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)([^{}]+)\{").unwrap());

/// Appends `[data-v-xxxx]` to each top-level selector. A textual
/// approximation of `scoped` style rewriting — not a full CSS selector
/// parser, the same tradeoff `css_simple.rs` makes for `@import`
/// extraction.
fn scope_style(css: &str, scope_id: &str) -> String {
    SELECTOR_RE
        .replace_all(css, |caps: &regex::Captures| {
            let selector = caps[1].trim();
            format!("{selector}[{scope_id}] {{")
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_closing_template_compiles_to_an_h_call() {
        let compiler = VueCompiler::new();
        let output = compiler
            .compile("<template><b/></template><style scoped>b{}</style>", "/Comp.vue")
            .unwrap();
        assert!(output.code.contains("h(\"b\""));
        assert!(output.code.contains("__scopeId"));
        let metadata = output.css_metadata.unwrap();
        assert!(metadata.scope_id.is_some());
    }

    #[test]
    fn scoped_style_gets_the_scope_attribute_selector() {
        let compiler = VueCompiler::new();
        let output = compiler
            .compile("<template><b/></template><style scoped>b{color:red;}</style>", "/Comp.vue")
            .unwrap();
        let css = output.css.unwrap();
        assert!(css.contains("[data-v-"));
    }

    #[test]
    fn unscoped_style_is_left_unmodified() {
        let compiler = VueCompiler::new();
        let output = compiler
            .compile("<template><b/></template><style>b{color:red;}</style>", "/Comp.vue")
            .unwrap();
        let css = output.css.unwrap();
        assert!(!css.contains("[data-v-"));
    }

    #[test]
    fn interpolation_and_nested_elements_compile() {
        let compiler = VueCompiler::new();
        let output = compiler
            .compile(
                "<template><div class=\"a\">{{ msg }}<span>child</span></div></template>",
                "/Nested.vue",
            )
            .unwrap();
        assert!(output.code.contains("h(\"div\""));
        assert!(output.code.contains("h(\"span\""));
        assert!(output.code.contains("String(msg)"));
    }

    #[test]
    fn options_api_script_gets_scope_id_and_render_injected() {
        let compiler = VueCompiler::new();
        let source = "<template><p/></template><script>export default { name: \"X\" }</script>";
        let output = compiler.compile(source, "/X.vue").unwrap();
        assert!(output.code.contains("name: \"X\""));
        assert!(output.code.contains("render(ctx)"));
    }

    #[test]
    fn script_setup_bindings_are_exposed_to_render() {
        let compiler = VueCompiler::new();
        let source =
            "<template><p/></template><script setup>const count = 1</script>";
        let output = compiler.compile(source, "/Setup.vue").unwrap();
        assert!(output.code.contains("setup()"));
        assert!(output.code.contains("count"));
    }

    #[test]
    fn rebuilding_identical_source_twice_keeps_aggregator_size_one() {
        use crate::css_aggregator::CssAggregator;
        let compiler = VueCompiler::new();
        let source = "<template><b/></template><style scoped>b{}</style>";
        let mut aggregator = CssAggregator::new();
        for _ in 0..2 {
            let output = compiler.compile(source, "/Comp.vue").unwrap();
            if let (Some(css), Some(meta)) = (output.css, output.css_metadata) {
                aggregator.add_css("/Comp.vue", css, meta.entry_type, meta.scope_id);
            }
        }
        assert_eq!(aggregator.len(), 1);
    }
}
