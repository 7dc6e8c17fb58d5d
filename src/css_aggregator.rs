//! Component D — CSS Aggregator (spec.md §4.D).
//!
//! Collects per-source-file CSS (Vue `<style>` blocks, Tailwind JIT output,
//! plain `.css` imports) keyed by a normalized source path, and renders a
//! single stylesheet ordered by `(type_priority, insertion_order)` so
//! framework resets stay ahead of component styles regardless of import
//! order. Grounded on the teacher's `css_simple.rs`, which is the only CSS
//! path actually wired into its pipeline (the `lightningcss`-backed
//! `css.rs` is dead code there) — this crate keeps that same
//! source-keyed-map-plus-stable-order shape.

use std::collections::HashMap;

/// The three CSS producers named in spec.md §3/§4.D, in their fixed render
/// priority (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CssEntryType {
    Base,
    Tailwind,
    Component,
}

impl CssEntryType {
    fn priority(self) -> u8 {
        match self {
            CssEntryType::Base => 0,
            CssEntryType::Tailwind => 1,
            CssEntryType::Component => 2,
        }
    }
}

struct Entry {
    css: String,
    entry_type: CssEntryType,
    scope_id: Option<String>,
    order: usize,
}

/// Normalizes a source path the way the aggregator keys entries: lowercase,
/// query-string stripped, leading slash enforced.
fn normalize_source(source: &str) -> String {
    let without_query = source.split(['?', '#']).next().unwrap_or("");
    let lower = without_query.to_lowercase();
    if lower.starts_with('/') {
        lower
    } else {
        format!("/{lower}")
    }
}

/// Aggregates CSS entries from every compiled source file into one
/// stylesheet. At most one entry exists per normalized source; re-adding
/// replaces it but keeps its original order slot so an unrelated
/// incremental rebuild doesn't reshuffle unrelated output.
pub struct CssAggregator {
    entries: HashMap<String, Entry>,
    next_order: usize,
}

impl Default for CssAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CssAggregator {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_order: 0,
        }
    }

    /// `addCSS(source, css, type, scopeId?)` — empty/whitespace CSS is
    /// silently skipped (spec.md §4.D).
    pub fn add_css(
        &mut self,
        source: &str,
        css: String,
        entry_type: CssEntryType,
        scope_id: Option<String>,
    ) {
        if css.trim().is_empty() {
            return;
        }
        let key = normalize_source(source);
        let order = self
            .entries
            .get(&key)
            .map(|e| e.order)
            .unwrap_or_else(|| {
                let order = self.next_order;
                self.next_order += 1;
                order
            });
        self.entries.insert(
            key,
            Entry {
                css,
                entry_type,
                scope_id,
                order,
            },
        );
    }

    pub fn remove(&mut self, source: &str) {
        self.entries.remove(&normalize_source(source));
    }

    pub fn contains(&self, source: &str) -> bool {
        self.entries.contains_key(&normalize_source(source))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_order = 0;
    }

    fn sorted_keys(&self) -> Vec<&String> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort_by_key(|k| {
            let e = &self.entries[*k];
            (e.entry_type.priority(), e.order)
        });
        keys
    }

    /// `aggregate()` — one stylesheet, entries sorted by `(type, order)`,
    /// each prefixed with a `/* Source: … */` comment.
    pub fn aggregate(&self) -> String {
        let mut out = String::new();
        for key in self.sorted_keys() {
            let entry = &self.entries[key];
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("/* Source: {key} */\n"));
            out.push_str(&entry.css);
        }
        out
    }

    /// `aggregateGrouped()` — three strings (base, tailwind, component) in
    /// the same ordering as `aggregate()`, one per bucket.
    pub fn aggregate_grouped(&self) -> (String, String, String) {
        let mut buckets = [String::new(), String::new(), String::new()];
        for key in self.sorted_keys() {
            let entry = &self.entries[key];
            let bucket = &mut buckets[entry.entry_type.priority() as usize];
            if !bucket.is_empty() {
                bucket.push('\n');
            }
            bucket.push_str(&format!("/* Source: {key} */\n"));
            bucket.push_str(&entry.css);
        }
        let [base, tailwind, component] = buckets;
        (base, tailwind, component)
    }

    pub fn scope_id_for(&self, source: &str) -> Option<String> {
        self.entries
            .get(&normalize_source(source))
            .and_then(|e| e.scope_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_renders_before_tailwind_and_component_regardless_of_insertion_order() {
        let mut agg = CssAggregator::new();
        agg.add_css("/comp.vue", "a{color:red}".into(), CssEntryType::Component, None);
        agg.add_css("/reset.css", "b{color:blue}".into(), CssEntryType::Base, None);
        agg.add_css("/tw.css", "c{color:green}".into(), CssEntryType::Tailwind, None);

        let rendered = agg.aggregate();
        let base_pos = rendered.find("b{color:blue}").unwrap();
        let tw_pos = rendered.find("c{color:green}").unwrap();
        let comp_pos = rendered.find("a{color:red}").unwrap();
        assert!(base_pos < tw_pos);
        assert!(tw_pos < comp_pos);
    }

    #[test]
    fn readding_the_same_source_replaces_rather_than_duplicates() {
        let mut agg = CssAggregator::new();
        agg.add_css("/a.css", "first".into(), CssEntryType::Base, None);
        agg.add_css("/a.css", "second".into(), CssEntryType::Component, None);
        assert_eq!(agg.len(), 1);
        assert!(agg.aggregate().contains("second"));
        assert!(!agg.aggregate().contains("first"));
    }

    #[test]
    fn source_keys_are_normalized() {
        let mut agg = CssAggregator::new();
        agg.add_css("src/App.vue?t=123", "a{}".into(), CssEntryType::Component, None);
        assert!(agg.contains("/src/app.vue"));
    }

    #[test]
    fn empty_css_is_skipped() {
        let mut agg = CssAggregator::new();
        agg.add_css("/empty.css", "   ".into(), CssEntryType::Base, None);
        assert!(agg.is_empty());
    }

    #[test]
    fn replacing_a_source_preserves_its_original_position() {
        let mut agg = CssAggregator::new();
        agg.add_css("/a.css", "a1".into(), CssEntryType::Base, None);
        agg.add_css("/b.css", "b1".into(), CssEntryType::Base, None);
        agg.add_css("/a.css", "a2".into(), CssEntryType::Base, None);

        let rendered = agg.aggregate();
        let a_pos = rendered.find("a2").unwrap();
        let b_pos = rendered.find("b1").unwrap();
        assert!(a_pos < b_pos, "updating /a.css must not move it after /b.css");
    }

    #[test]
    fn aggregate_grouped_matches_aggregate_ordering_per_bucket() {
        let mut agg = CssAggregator::new();
        agg.add_css("/a.css", "a{}".into(), CssEntryType::Base, None);
        agg.add_css("/b.vue", "b{}".into(), CssEntryType::Component, Some("data-v-1".into()));
        let (base, _tailwind, component) = agg.aggregate_grouped();
        assert!(base.contains("a{}"));
        assert!(component.contains("b{}"));
    }

    #[test]
    fn clear_resets_order_counter() {
        let mut agg = CssAggregator::new();
        agg.add_css("/a.css", "a{}".into(), CssEntryType::Base, None);
        agg.clear();
        assert!(agg.is_empty());
        agg.add_css("/b.css", "b{}".into(), CssEntryType::Base, None);
        assert_eq!(agg.aggregate(), "/* Source: /b.css */\nb{}");
    }
}
