//! Virtual filesystem resolver plugin (spec.md §4.F).
//!
//! Grounded on the teacher's `resolver.rs` (alias/relative/absolute/bare
//! resolution order) and `utils/path_aliases.rs` (longest-prefix alias
//! matching).

use base64::Engine;

use super::{loader_for_extension, Loader};
use crate::types::{normalize_path, VirtualFilesystem};

const EXTENSION_LADDER: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs", ".json"];

/// `@/...` rewrites to `/src/...`, matching the teacher's single
/// configured alias. Extending to multiple aliases would be a small
/// generalization (a `Vec<(prefix, target)>` table) but the spec names
/// only this one.
const ALIAS_PREFIX: &str = "@/";
const ALIAS_TARGET: &str = "/src/";

pub struct VirtualFsResolver<'a> {
    fs: &'a VirtualFilesystem,
}

impl<'a> VirtualFsResolver<'a> {
    pub fn new(fs: &'a VirtualFilesystem) -> Self {
        Self { fs }
    }

    /// Resolves a specifier imported from `importer`. Returns `None` if
    /// none of the ladder candidates exist in the virtual filesystem.
    pub fn resolve(&self, specifier: &str, importer: &str) -> Option<String> {
        if let Some(rest) = specifier.strip_prefix(ALIAS_PREFIX) {
            let aliased = format!("{ALIAS_TARGET}{rest}");
            return self.resolve_with_ladder(&aliased);
        }

        if specifier.starts_with("./") || specifier.starts_with("../") {
            let importer_dir = parent_dir(importer);
            let joined = join_path(&importer_dir, specifier);
            return self.resolve_with_ladder(&joined);
        }

        if specifier.starts_with('/') {
            return self.resolve_with_ladder(specifier);
        }

        None
    }

    /// Tries the path as-is, then with each extension in the ladder, then
    /// `/index<ext>` under the path as a directory. First match wins.
    fn resolve_with_ladder(&self, path: &str) -> Option<String> {
        let normalized = normalize_path(path);
        if self.fs.contains(&normalized) {
            return Some(normalized);
        }
        for ext in EXTENSION_LADDER {
            let candidate = format!("{normalized}{ext}");
            if self.fs.contains(&candidate) {
                return Some(candidate);
            }
        }
        for ext in EXTENSION_LADDER {
            let candidate = format!("{normalized}/index{ext}");
            if self.fs.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Loads a resolved path's content paired with its loader.
    pub fn load(&self, path: &str) -> Option<(LoadedFile, Loader)> {
        let content = self.fs.get(path)?;
        let loader = loader_for_extension(path);
        let loaded = match loader {
            Loader::DataUrl => LoadedFile::DataUrl(to_data_url(path, content.as_bytes())),
            _ => LoadedFile::Text(content.to_string()),
        };
        Some((loaded, loader))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedFile {
    Text(String),
    DataUrl(String),
}

pub(crate) fn to_data_url(path: &str, bytes: &[u8]) -> String {
    let mime = mime_for_extension(path);
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

fn mime_for_extension(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".avif") {
        "image/avif"
    } else {
        "application/octet-stream"
    }
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Joins a relative specifier against a directory, resolving `.`/`..`
/// segments.
fn join_path(dir: &str, specifier: &str) -> String {
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_with(files: &[(&str, &str)]) -> VirtualFilesystem {
        let mut fs = VirtualFilesystem::new();
        for (path, content) in files {
            fs.insert(*path, *content);
        }
        fs
    }

    #[test]
    fn resolves_path_alias() {
        let fs = fs_with(&[("/src/lib.ts", "export const x = 1;")]);
        let resolver = VirtualFsResolver::new(&fs);
        assert_eq!(
            resolver.resolve("@/lib", "/src/main.ts"),
            Some("/src/lib.ts".to_string())
        );
    }

    #[test]
    fn resolves_relative_import_against_importer_directory() {
        let fs = fs_with(&[("/src/lib.ts", "")]);
        let resolver = VirtualFsResolver::new(&fs);
        assert_eq!(
            resolver.resolve("./lib", "/src/main.ts"),
            Some("/src/lib.ts".to_string())
        );
    }

    #[test]
    fn resolves_parent_relative_import() {
        let fs = fs_with(&[("/lib.ts", "")]);
        let resolver = VirtualFsResolver::new(&fs);
        assert_eq!(
            resolver.resolve("../lib", "/src/nested/main.ts"),
            Some("/lib.ts".to_string())
        );
    }

    #[test]
    fn falls_back_through_extension_ladder_in_order() {
        let fs = fs_with(&[("/src/lib.js", "")]);
        let resolver = VirtualFsResolver::new(&fs);
        assert_eq!(
            resolver.resolve("./lib", "/src/main.ts"),
            Some("/src/lib.js".to_string())
        );
    }

    #[test]
    fn falls_back_to_index_under_directory() {
        let fs = fs_with(&[("/src/components/index.tsx", "")]);
        let resolver = VirtualFsResolver::new(&fs);
        assert_eq!(
            resolver.resolve("./components", "/src/main.ts"),
            Some("/src/components/index.tsx".to_string())
        );
    }

    #[test]
    fn unresolvable_specifier_is_none() {
        let fs = fs_with(&[]);
        let resolver = VirtualFsResolver::new(&fs);
        assert_eq!(resolver.resolve("./missing", "/src/main.ts"), None);
    }

    #[test]
    fn images_load_as_data_urls() {
        let fs = fs_with(&[("/logo.png", "not-really-png-bytes")]);
        let resolver = VirtualFsResolver::new(&fs);
        let (loaded, loader) = resolver.load("/logo.png").unwrap();
        assert_eq!(loader, Loader::DataUrl);
        match loaded {
            LoadedFile::DataUrl(url) => assert!(url.starts_with("data:image/png;base64,")),
            _ => panic!("expected a data url"),
        }
    }

    #[test]
    fn css_loads_as_text_with_css_loader() {
        let fs = fs_with(&[("/a.css", "body{}")]);
        let resolver = VirtualFsResolver::new(&fs);
        let (loaded, loader) = resolver.load("/a.css").unwrap();
        assert_eq!(loader, Loader::Css);
        assert_eq!(loaded, LoadedFile::Text("body{}".to_string()));
    }
}
