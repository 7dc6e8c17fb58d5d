use std::path::PathBuf;
use thiserror::Error;

/// Location context attached to a diagnostic so the caller can point at the
/// offending source.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub snippet: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
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

/// Error taxonomy for the build engine (spec.md §7).
#[derive(Error, Debug)]
pub enum SokuWebError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Per-file framework-compiler failure. Never aborts a build: the
    /// orchestrator attaches it to `errors[]` and passes the source through
    /// unchanged.
    #[error("compile error: {message}")]
    Compile {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Resolver failure (virtual-fs or CDN plugin). Causes esbuild-equivalent
    /// output of `code=""` for the affected build.
    #[error("resolve error: {message}")]
    Resolve {
        message: String,
        context: Option<ErrorContext>,
    },

    /// CDN fetch exhausted its retry budget.
    #[error("fetch error: {message} (status {status:?})")]
    Fetch {
        message: String,
        status: Option<u16>,
    },

    /// Bundle worker crashed, esbuild-equivalent step failed, or an
    /// unhandled rejection was caught by the worker's global handler.
    #[error("worker error: {0}")]
    Worker(String),

    /// The worker was disposed (or the in-flight request otherwise torn
    /// down) before replying. Distinct from `Worker` so callers can match
    /// on cancellation specifically rather than treating it as an opaque
    /// worker failure.
    #[error("build cancelled: worker was disposed before replying")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl SokuWebError {
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
            context: None,
        }
    }

    pub fn compile_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Compile {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn resolve(message: impl Into<String>) -> Self {
        Self::Resolve {
            message: message.into(),
            context: None,
        }
    }

    pub fn resolve_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Resolve {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn fetch(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Fetch {
            message: message.into(),
            status,
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Human-readable rendering with file/line/snippet, for the CLI.
    pub fn format_detailed(&self) -> String {
        match self {
            SokuWebError::Compile { message, context } => {
                Self::render("Compile error", message, context)
            }
            SokuWebError::Resolve { message, context } => {
                Self::render("Resolve error", message, context)
            }
            other => other.to_string(),
        }
    }

    fn render(kind: &str, message: &str, context: &Option<ErrorContext>) -> String {
        let mut out = format!("{kind}: {message}");
        if let Some(ctx) = context {
            if let Some(path) = &ctx.file_path {
                out.push_str(&format!("\n  --> {}", path.display()));
                if let (Some(line), Some(col)) = (ctx.line, ctx.column) {
                    out.push_str(&format!(":{line}:{col}"));
                }
            }
            if let Some(snippet) = &ctx.snippet {
                out.push_str(&format!("\n{snippet}"));
            }
        }
        out
    }
}

impl From<anyhow::Error> for SokuWebError {
    fn from(err: anyhow::Error) -> Self {
        SokuWebError::Other(err.to_string())
    }
}

impl From<regex::Error> for SokuWebError {
    fn from(err: regex::Error) -> Self {
        SokuWebError::compile(format!("regex error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, SokuWebError>;
