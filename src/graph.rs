//! Component B — Dependency Graph (spec.md §4.B).
//!
//! A directed graph of intra-project imports plus reverse edges and a
//! per-file npm-specifier set. Paths are interned (`string-interner`, as
//! `utils/performance.rs` in the teacher repo already does) so that the
//! same path repeated across many edges shares one backing allocation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

use crate::hash::content_hash;

const GRAPH_RECORD_VERSION: u32 = 1;

/// Public, flattened view of one graph vertex (spec.md §3 `FileNode`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileNode {
    pub path: String,
    pub imports: Vec<String>,
    pub imported_by: Vec<String>,
    pub npm_dependencies: Vec<String>,
    /// Empty string denotes a placeholder node inserted as an import target
    /// before the file itself was observed.
    pub content_hash: String,
    pub last_modified: u64,
}

struct NodeData {
    imports: HashSet<DefaultSymbol>,
    imported_by: HashSet<DefaultSymbol>,
    npm_dependencies: HashSet<String>,
    content_hash: String,
    last_modified: u64,
}

impl NodeData {
    fn placeholder() -> Self {
        Self {
            imports: HashSet::new(),
            imported_by: HashSet::new(),
            npm_dependencies: HashSet::new(),
            content_hash: String::new(),
            last_modified: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct DependencyGraph {
    interner: StringInterner<DefaultBackend>,
    nodes: HashMap<DefaultSymbol, NodeData>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            interner: StringInterner::new(),
            nodes: HashMap::new(),
        }
    }

    fn sym(&mut self, path: &str) -> DefaultSymbol {
        self.interner.get_or_intern(path)
    }

    fn resolve(&self, sym: DefaultSymbol) -> &str {
        self.interner
            .resolve(sym)
            .expect("symbol was interned by this graph")
    }

    /// `addFile(path, content, imports, npmDeps)` — spec.md §4.B.
    ///
    /// Diffs the previous `imports` set against the new one, dropping
    /// reverse edges that no longer apply and inserting placeholder nodes
    /// for import targets not yet observed.
    pub fn add_file(
        &mut self,
        path: &str,
        content: &str,
        imports: &[String],
        npm_dependencies: &[String],
    ) {
        let hash = content_hash(content).to_string();
        let path_sym = self.sym(path);
        let new_import_syms: HashSet<DefaultSymbol> =
            imports.iter().map(|p| self.sym(p)).collect();

        let old_imports = self
            .nodes
            .get(&path_sym)
            .map(|n| n.imports.clone())
            .unwrap_or_default();

        // Remove reverse edges for imports that are no longer present.
        for removed in old_imports.difference(&new_import_syms) {
            if let Some(target) = self.nodes.get_mut(removed) {
                target.imported_by.remove(&path_sym);
            }
        }

        // Insert placeholder nodes for newly-referenced targets and wire
        // up forward/reverse edges.
        for &target_sym in &new_import_syms {
            self.nodes
                .entry(target_sym)
                .or_insert_with(NodeData::placeholder)
                .imported_by
                .insert(path_sym);
        }

        let entry = self.nodes.entry(path_sym).or_insert_with(NodeData::placeholder);
        entry.imports = new_import_syms;
        entry.npm_dependencies = npm_dependencies.iter().cloned().collect();
        entry.content_hash = hash;
        entry.last_modified = now_millis();
    }

    /// `removeFile(path)` — deletes the node and all incident edges from
    /// both sides.
    pub fn remove_file(&mut self, path: &str) {
        let Some(path_sym) = self.interner.get(path) else {
            return;
        };
        let Some(node) = self.nodes.remove(&path_sym) else {
            return;
        };
        for target in &node.imports {
            if let Some(t) = self.nodes.get_mut(target) {
                t.imported_by.remove(&path_sym);
            }
        }
        for source in &node.imported_by {
            if let Some(s) = self.nodes.get_mut(source) {
                s.imports.remove(&path_sym);
            }
        }
    }

    /// `hasFileChanged(path, newContent)` — true if the node is absent or
    /// its stored hash differs from the hash of `newContent`.
    pub fn has_file_changed(&self, path: &str, new_content: &str) -> bool {
        let Some(sym) = self.interner.get(path) else {
            return true;
        };
        match self.nodes.get(&sym) {
            Some(node) => node.content_hash != content_hash(new_content).to_string(),
            None => true,
        }
    }

    /// `getAffectedFiles(changedPath)` — BFS over reverse edges, cycle-safe
    /// via a visited set. Includes the seed.
    pub fn get_affected_files(&self, changed_path: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let Some(seed) = self.interner.get(changed_path) else {
            // Unknown path: the affected set is just itself.
            visited.insert(changed_path.to_string());
            return visited;
        };

        let mut visited_syms = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(seed);
        visited_syms.insert(seed);

        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&current) {
                for &dependent in &node.imported_by {
                    if visited_syms.insert(dependent) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        for sym in visited_syms {
            visited.insert(self.resolve(sym).to_string());
        }
        visited
    }

    /// `getAffectedFilesForChanges(paths[])` — union of `getAffectedFiles`
    /// per path.
    pub fn get_affected_files_for_changes(&self, paths: &[String]) -> HashSet<String> {
        let mut union = HashSet::new();
        for path in paths {
            union.extend(self.get_affected_files(path));
        }
        union
    }

    /// `hasNpmDependenciesChanged(newSet)` — true if the union of every
    /// node's npm deps differs from `newSet` by size or membership.
    pub fn has_npm_dependencies_changed(&self, new_set: &HashSet<String>) -> bool {
        let mut current = HashSet::new();
        for node in self.nodes.values() {
            current.extend(node.npm_dependencies.iter().cloned());
        }
        current != *new_set
    }

    pub fn get_file(&self, path: &str) -> Option<FileNode> {
        let sym = self.interner.get(path)?;
        let node = self.nodes.get(&sym)?;
        Some(FileNode {
            path: path.to_string(),
            imports: node.imports.iter().map(|s| self.resolve(*s).to_string()).collect(),
            imported_by: node
                .imported_by
                .iter()
                .map(|s| self.resolve(*s).to_string())
                .collect(),
            npm_dependencies: node.npm_dependencies.iter().cloned().collect(),
            content_hash: node.content_hash.clone(),
            last_modified: node.last_modified,
        })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.interner
            .get(path)
            .map(|s| self.nodes.contains_key(&s))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Versioned plain-record serialization (spec.md §4.B / §6).
    pub fn serialize(&self) -> GraphRecord {
        let nodes = self
            .nodes
            .keys()
            .filter_map(|&sym| {
                let path = self.resolve(sym).to_string();
                self.get_file(&path)
            })
            .collect();
        GraphRecord {
            version: GRAPH_RECORD_VERSION,
            nodes,
        }
    }

    /// Deserializing a mismatched version yields a fresh empty graph
    /// rather than erroring (spec.md §4.B).
    pub fn deserialize(record: GraphRecord) -> Self {
        if record.version != GRAPH_RECORD_VERSION {
            return Self::new();
        }
        let mut graph = Self::new();
        for node in &record.nodes {
            let path_sym = graph.sym(&node.path);
            let imports: HashSet<DefaultSymbol> =
                node.imports.iter().map(|p| graph.sym(p)).collect();
            let imported_by: HashSet<DefaultSymbol> =
                node.imported_by.iter().map(|p| graph.sym(p)).collect();
            graph.nodes.insert(
                path_sym,
                NodeData {
                    imports,
                    imported_by,
                    npm_dependencies: node.npm_dependencies.iter().cloned().collect(),
                    content_hash: node.content_hash.clone(),
                    last_modified: node.last_modified,
                },
            );
        }
        graph
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    pub version: u32,
    pub nodes: Vec<FileNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn bidirectional_edges_stay_consistent() {
        let mut graph = DependencyGraph::new();
        graph.add_file("/a.ts", "import './b'", &[path("/b.ts")], &[]);
        graph.add_file("/b.ts", "export const x = 1", &[], &[]);

        let a = graph.get_file("/a.ts").unwrap();
        let b = graph.get_file("/b.ts").unwrap();
        assert!(a.imports.contains(&"/b.ts".to_string()));
        assert!(b.imported_by.contains(&"/a.ts".to_string()));
    }

    #[test]
    fn removing_a_file_clears_all_incident_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_file("/a.ts", "", &[path("/b.ts")], &[]);
        graph.add_file("/b.ts", "", &[], &[]);

        graph.remove_file("/b.ts");
        assert!(!graph.contains("/b.ts"));
        let a = graph.get_file("/a.ts").unwrap();
        assert!(!a.imports.contains(&"/b.ts".to_string()));
    }

    #[test]
    fn removing_a_file_clears_it_from_importers_import_lists() {
        let mut graph = DependencyGraph::new();
        graph.add_file("/a.ts", "", &[path("/b.ts")], &[]);
        graph.add_file("/b.ts", "", &[], &[]);

        graph.remove_file("/a.ts");
        assert!(!graph.contains("/a.ts"));
        // /b.ts was a placeholder target of /a.ts; its importedBy must drop /a.ts
        let b = graph.get_file("/b.ts").unwrap();
        assert!(!b.imported_by.contains(&"/a.ts".to_string()));
    }

    #[test]
    fn affected_files_terminate_on_cycles() {
        let mut graph = DependencyGraph::new();
        graph.add_file("/a.ts", "", &[path("/b.ts")], &[]);
        graph.add_file("/b.ts", "", &[path("/a.ts")], &[]);

        let affected = graph.get_affected_files("/a.ts");
        assert_eq!(affected.len(), 2);
        assert!(affected.contains("/a.ts"));
        assert!(affected.contains("/b.ts"));
    }

    #[test]
    fn affected_files_includes_the_seed() {
        let mut graph = DependencyGraph::new();
        graph.add_file("/a.ts", "", &[], &[]);
        let affected = graph.get_affected_files("/a.ts");
        assert!(affected.contains("/a.ts"));
        assert_eq!(affected.len(), 1);
    }

    #[test]
    fn transitive_reverse_closure() {
        let mut graph = DependencyGraph::new();
        // main -> lib -> helpers
        graph.add_file("/main.ts", "", &[path("/lib.ts")], &[]);
        graph.add_file("/lib.ts", "", &[path("/helpers.ts")], &[]);
        graph.add_file("/helpers.ts", "", &[], &[]);

        let affected = graph.get_affected_files("/helpers.ts");
        assert_eq!(affected.len(), 3);
        assert!(affected.contains("/main.ts"));
        assert!(affected.contains("/lib.ts"));
    }

    #[test]
    fn npm_dependency_diff() {
        let mut graph = DependencyGraph::new();
        graph.add_file("/a.ts", "", &[], &[path("react")]);

        let mut same = HashSet::new();
        same.insert("react".to_string());
        assert!(!graph.has_npm_dependencies_changed(&same));

        let mut changed = HashSet::new();
        changed.insert("vue".to_string());
        assert!(graph.has_npm_dependencies_changed(&changed));
    }

    #[test]
    fn version_mismatch_on_deserialize_yields_fresh_graph() {
        let record = GraphRecord {
            version: GRAPH_RECORD_VERSION + 1,
            nodes: vec![FileNode {
                path: "/a.ts".to_string(),
                imports: vec![],
                imported_by: vec![],
                npm_dependencies: vec![],
                content_hash: "x".to_string(),
                last_modified: 0,
            }],
        };
        let graph = DependencyGraph::deserialize(record);
        assert!(graph.is_empty());
    }

    #[test]
    fn roundtrip_serialize_deserialize() {
        let mut graph = DependencyGraph::new();
        graph.add_file("/a.ts", "x", &[path("/b.ts")], &[path("react")]);
        graph.add_file("/b.ts", "y", &[], &[]);

        let record = graph.serialize();
        let restored = DependencyGraph::deserialize(record);
        assert!(restored.contains("/a.ts"));
        assert!(restored.contains("/b.ts"));
        let a = restored.get_file("/a.ts").unwrap();
        assert!(a.imports.contains(&"/b.ts".to_string()));
    }
}
