//! Component E — Framework Compilers (spec.md §4.E).
//!
//! A `FrameworkCompiler` is the capability-record pattern the teacher uses
//! for plugins (`core/plugin.rs`: `name`/`canHandle`/dispatch through a
//! registry) generalized to the spec's `{name, extensions, canHandle,
//! init, compile}` contract. The registry dispatches by the first
//! compiler whose `can_handle` returns true — callers add more compilers
//! without the registry knowing their concrete type.

pub mod tailwind;
pub mod vue;

use async_trait::async_trait;

use crate::css_aggregator::CssEntryType;
use crate::utils::Result;

/// CSS side-channel metadata a compiler attaches to its output so the
/// aggregator can classify and scope it (spec.md §3/§4.E).
#[derive(Debug, Clone)]
pub struct CssMetadata {
    pub entry_type: CssEntryType,
    pub scope_id: Option<String>,
}

/// Result of compiling one source file.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub code: String,
    pub css: Option<String>,
    pub css_metadata: Option<CssMetadata>,
    pub warnings: Vec<String>,
}

/// The only polymorphic surface in the engine (spec.md §9). Implement as a
/// small capability record, not a deep trait hierarchy.
#[async_trait]
pub trait FrameworkCompiler: Send + Sync {
    fn name(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];

    fn can_handle(&self, path: &str) -> bool {
        self.extensions()
            .iter()
            .any(|ext| path.to_lowercase().ends_with(ext))
    }

    /// Lazily loads whatever the compiler needs; idempotent — a second
    /// call is a no-op (spec.md: "subsequent init calls are no-ops").
    async fn init(&self) -> Result<()>;

    fn compile(&self, source: &str, path: &str) -> Result<CompileOutput>;
}

/// Dispatches to the first registered compiler whose `can_handle` matches
/// a given path, in registration order (spec.md §4.E).
pub struct CompilerRegistry {
    compilers: Vec<Box<dyn FrameworkCompiler>>,
}

impl Default for CompilerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(vue::VueCompiler::new()));
        registry.register(Box::new(tailwind::TailwindCompiler::new()));
        registry
    }
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self {
            compilers: Vec::new(),
        }
    }

    pub fn register(&mut self, compiler: Box<dyn FrameworkCompiler>) {
        self.compilers.push(compiler);
    }

    pub fn find_for(&self, path: &str) -> Option<&dyn FrameworkCompiler> {
        self.compilers
            .iter()
            .map(|c| c.as_ref())
            .find(|c| c.can_handle(path))
    }

    pub async fn init_all(&self) -> Result<()> {
        for compiler in &self.compilers {
            compiler.init().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_dispatches_by_extension_in_registration_order() {
        let registry = CompilerRegistry::default();
        assert_eq!(
            registry.find_for("/src/App.vue").map(|c| c.name()),
            Some("vue")
        );
        assert_eq!(
            registry.find_for("/src/tailwind.css").map(|c| c.name()),
            Some("tailwind")
        );
        assert!(registry.find_for("/src/main.ts").is_none());
    }
}
