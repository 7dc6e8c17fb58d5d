//! Component C — Bundle Cache (spec.md §4.C).
//!
//! An LRU cache keyed by `(path, contentHash)`, bounded by both entry count
//! and approximate memory footprint, with an optional TTL. Grounded on the
//! teacher's `memory.rs::LruCache` (access-order `VecDeque` plus a running
//! byte count compared against a cap), generalized with a secondary
//! path → key-set index so `invalidateBundle`/`invalidateDependents` can
//! act on every version of a path without a linear scan, plus an injectable
//! `Clock` so TTL expiry is deterministic under test (spec.md §9, Open
//! Question ii).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::hash::content_hash;

/// Abstraction over wall-clock time so cache TTL tests don't need to sleep.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real clock, used by the engine outside of tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose value only advances when told to, for deterministic TTL
/// tests.
pub struct ManualClock {
    base: Instant,
    offset: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.offset
            .fetch_add(duration.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset.load(std::sync::atomic::Ordering::SeqCst))
    }
}

struct Entry<V> {
    value: V,
    size: usize,
    inserted_at: Instant,
}

/// Generic LRU+TTL map, the building block both the bundle and CSS caches
/// are instantiated from.
struct LruCache<V> {
    entries: HashMap<String, Entry<V>>,
    /// Most-recently-used key is the back of the deque.
    order: std::collections::VecDeque<String>,
    max_entries: usize,
    max_memory_bytes: usize,
    ttl: Option<Duration>,
    current_memory_bytes: usize,
    clock: Arc<dyn Clock>,
}

impl<V> LruCache<V> {
    fn new(
        max_entries: usize,
        max_memory_bytes: usize,
        ttl: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            order: std::collections::VecDeque::new(),
            max_entries,
            max_memory_bytes,
            ttl,
            current_memory_bytes: 0,
            clock,
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(pos).unwrap();
            self.order.push_back(key);
        }
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        match self.ttl {
            Some(ttl) => self.clock.now().duration_since(entry.inserted_at) >= ttl,
            None => false,
        }
    }

    /// Returns `None` on miss or expiry; an expired entry is evicted eagerly
    /// on the read that discovers it.
    fn get(&mut self, key: &str) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(entry) => self.is_expired(entry),
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }
        self.touch(key);
        self.entries.get(key).map(|e| &e.value)
    }

    fn set(&mut self, key: String, value: V, size: usize) -> Vec<String> {
        self.remove(&key);
        self.entries.insert(
            key.clone(),
            Entry {
                value,
                size,
                inserted_at: self.clock.now(),
            },
        );
        self.order.push_back(key);
        self.current_memory_bytes += size;
        self.evict_to_fit()
    }

    /// Evicts least-recently-accessed entries until both caps are
    /// satisfied, returning the evicted keys.
    fn evict_to_fit(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_entries
            || self.current_memory_bytes > self.max_memory_bytes
        {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.current_memory_bytes = self.current_memory_bytes.saturating_sub(entry.size);
            }
            evicted.push(oldest);
        }
        evicted
    }

    fn remove(&mut self, key: &str) -> Option<V> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key).map(|e| {
            self.current_memory_bytes = self.current_memory_bytes.saturating_sub(e.size);
            e.value
        })
    }

    fn contains(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) => !self.is_expired(entry),
            None => false,
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.current_memory_bytes = 0;
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter().map(|(k, e)| (k, &e.value))
    }
}

const DEFAULT_MAX_ENTRIES: usize = 200;
const DEFAULT_MAX_MEMORY_BYTES: usize = 32 * 1024 * 1024;
const DEFAULT_TTL_MS: u64 = 10 * 60 * 1000;

/// One compiled bundle plus the metadata the planner/engine need to decide
/// whether it is still valid (spec.md §3 `CachedBundle`).
#[derive(Debug, Clone)]
pub struct CachedBundle {
    pub code: String,
    pub css: Option<String>,
    pub source_map: Option<String>,
    pub imports: Vec<String>,
    pub npm_dependencies: Vec<String>,
    pub byte_size: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: usize,
}

fn cache_key(path: &str, hash: u32) -> String {
    format!("{path}\u{0}{hash}")
}

/// Paired JS-bundle and CSS caches, spec.md §4.C's `maxEntries`/
/// `maxMemory`/`ttlMs` configuration surface. Lookup key is `(path,
/// contentHash)`; a secondary path index supports path-scoped
/// invalidation without scanning every entry.
pub struct BundleCache {
    bundles: LruCache<CachedBundle>,
    css: LruCache<String>,
    bundle_paths: HashMap<String, HashSet<String>>,
    css_paths: HashMap<String, HashSet<String>>,
    hits: u64,
    misses: u64,
}

impl BundleCache {
    pub fn new(max_entries: usize, max_memory_bytes: usize, ttl_ms: Option<u64>) -> Self {
        Self::with_clock(max_entries, max_memory_bytes, ttl_ms, Arc::new(SystemClock))
    }

    pub fn with_clock(
        max_entries: usize,
        max_memory_bytes: usize,
        ttl_ms: Option<u64>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = ttl_ms.map(Duration::from_millis);
        Self {
            bundles: LruCache::new(max_entries, max_memory_bytes, ttl, clock.clone()),
            css: LruCache::new(max_entries, max_memory_bytes, ttl, clock),
            bundle_paths: HashMap::new(),
            css_paths: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// `getBundle(path, content)` — spec.md §4.C.
    pub fn get_bundle(&mut self, path: &str, content: &str) -> Option<&CachedBundle> {
        let key = cache_key(path, content_hash(content));
        let result = self.bundles.get(&key);
        if result.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        result
    }

    pub fn has_bundle(&self, path: &str, content: &str) -> bool {
        self.bundles.contains(&cache_key(path, content_hash(content)))
    }

    /// `setBundle(path, content, bundle)` — inserts, evicting by the LRU
    /// policy if over capacity.
    pub fn set_bundle(&mut self, path: &str, content: &str, bundle: CachedBundle) {
        let key = cache_key(path, content_hash(content));
        let size = bundle.byte_size;
        self.bundle_paths
            .entry(path.to_string())
            .or_default()
            .insert(key.clone());
        let evicted = self.bundles.set(key, bundle, size);
        self.reconcile_path_index_after_eviction(&evicted, true);
    }

    fn reconcile_path_index_after_eviction(&mut self, evicted_keys: &[String], is_bundle: bool) {
        if evicted_keys.is_empty() {
            return;
        }
        let index = if is_bundle {
            &mut self.bundle_paths
        } else {
            &mut self.css_paths
        };
        index.retain(|_, keys| {
            for k in evicted_keys {
                keys.remove(k);
            }
            !keys.is_empty()
        });
    }

    /// `invalidateBundle(path)` — removes every version regardless of hash.
    pub fn invalidate_bundle(&mut self, path: &str) {
        if let Some(keys) = self.bundle_paths.remove(path) {
            for key in keys {
                self.bundles.remove(&key);
            }
        }
    }

    /// `invalidateDependents(path)` — removes entries whose stored
    /// `imports` include `path`; returns the removed count.
    pub fn invalidate_dependents(&mut self, path: &str) -> usize {
        let victims: Vec<String> = self
            .bundles
            .iter()
            .filter(|(_, bundle)| bundle.imports.iter().any(|p| p == path))
            .map(|(key, _)| key.clone())
            .collect();
        let count = victims.len();
        for key in &victims {
            self.bundles.remove(key);
        }
        self.bundle_paths.retain(|_, keys| {
            for key in &victims {
                keys.remove(key);
            }
            !keys.is_empty()
        });
        count
    }

    pub fn get_css(&mut self, path: &str, content: &str) -> Option<&String> {
        self.css.get(&cache_key(path, content_hash(content)))
    }

    pub fn set_css(&mut self, path: &str, content: &str, css: String) {
        let key = cache_key(path, content_hash(content));
        let size = css.len();
        self.css_paths
            .entry(path.to_string())
            .or_default()
            .insert(key.clone());
        let evicted = self.css.set(key, css, size);
        self.reconcile_path_index_after_eviction(&evicted, false);
    }

    pub fn invalidate_css(&mut self, path: &str) {
        if let Some(keys) = self.css_paths.remove(path) {
            for key in keys {
                self.css.remove(&key);
            }
        }
    }

    pub fn clear(&mut self) {
        self.bundles.clear();
        self.css.clear();
        self.bundle_paths.clear();
        self.css_paths.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.bundles.len(),
            memory_bytes: self.bundles.current_memory_bytes,
        }
    }

    pub fn get_cached_paths(&self) -> Vec<String> {
        self.bundle_paths.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty() && self.css.is_empty()
    }
}

impl Default for BundleCache {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ENTRIES,
            DEFAULT_MAX_MEMORY_BYTES,
            Some(DEFAULT_TTL_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(code: &str) -> CachedBundle {
        CachedBundle {
            code: code.to_string(),
            css: None,
            source_map: None,
            imports: vec![],
            npm_dependencies: vec![],
            byte_size: code.len(),
        }
    }

    #[test]
    fn set_then_get_returns_the_same_bundle() {
        let mut cache = BundleCache::new(200, usize::MAX, None);
        cache.set_bundle("/a.ts", "const x=1", bundle("compiled-a"));
        assert_eq!(cache.get_bundle("/a.ts", "const x=1").unwrap().code, "compiled-a");
    }

    #[test]
    fn different_content_is_a_distinct_cache_key() {
        let mut cache = BundleCache::new(200, usize::MAX, None);
        cache.set_bundle("/a.ts", "v1", bundle("k1"));
        cache.set_bundle("/a.ts", "v2", bundle("k2"));
        assert_eq!(cache.get_bundle("/a.ts", "v1").unwrap().code, "k1");
        assert_eq!(cache.get_bundle("/a.ts", "v2").unwrap().code, "k2");
    }

    #[test]
    fn invalidate_bundle_removes_every_version() {
        let mut cache = BundleCache::new(200, usize::MAX, None);
        cache.set_bundle("/a.ts", "v1", bundle("k1"));
        cache.set_bundle("/a.ts", "v2", bundle("k2"));
        cache.invalidate_bundle("/a.ts");
        assert!(!cache.has_bundle("/a.ts", "v1"));
        assert!(!cache.has_bundle("/a.ts", "v2"));
    }

    #[test]
    fn invalidate_dependents_removes_exactly_matching_entries() {
        let mut cache = BundleCache::new(200, usize::MAX, None);
        let mut dependent = bundle("k1");
        dependent.imports = vec!["/lib.ts".to_string()];
        cache.set_bundle("/main.ts", "v1", dependent);
        cache.set_bundle("/other.ts", "v1", bundle("k2"));

        let removed = cache.invalidate_dependents("/lib.ts");
        assert_eq!(removed, 1);
        assert!(!cache.has_bundle("/main.ts", "v1"));
        assert!(cache.has_bundle("/other.ts", "v1"));
    }

    #[test]
    fn eviction_drops_least_recently_accessed_first() {
        let mut cache = BundleCache::new(2, usize::MAX, None);
        cache.set_bundle("/a.ts", "v1", bundle("k1"));
        cache.set_bundle("/b.ts", "v1", bundle("k2"));
        cache.get_bundle("/a.ts", "v1"); // touch a, b becomes LRU
        cache.set_bundle("/c.ts", "v1", bundle("k3"));
        assert!(cache.has_bundle("/a.ts", "v1"));
        assert!(!cache.has_bundle("/b.ts", "v1"));
        assert!(cache.has_bundle("/c.ts", "v1"));
    }

    #[test]
    fn n_plus_one_inserts_keep_the_nth_most_recent() {
        let mut cache = BundleCache::new(3, usize::MAX, None);
        cache.set_bundle("/a.ts", "v1", bundle("k1"));
        cache.set_bundle("/b.ts", "v1", bundle("k2"));
        cache.set_bundle("/c.ts", "v1", bundle("k3"));
        cache.set_bundle("/d.ts", "v1", bundle("k4"));
        assert!(!cache.has_bundle("/a.ts", "v1"));
        assert!(cache.has_bundle("/d.ts", "v1"));
    }

    #[test]
    fn ttl_expiry_is_driven_by_injected_clock() {
        let clock = Arc::new(ManualClock::new());
        let mut cache =
            BundleCache::with_clock(200, usize::MAX, Some(1000), clock.clone());
        cache.set_bundle("/a.ts", "v1", bundle("k1"));
        assert!(cache.has_bundle("/a.ts", "v1"));
        clock.advance(Duration::from_millis(1500));
        assert!(cache.get_bundle("/a.ts", "v1").is_none());
    }

    #[test]
    fn hit_and_miss_counters_track_lookups() {
        let mut cache = BundleCache::new(200, usize::MAX, None);
        cache.set_bundle("/a.ts", "v1", bundle("k1"));
        cache.get_bundle("/a.ts", "v1");
        cache.get_bundle("/missing.ts", "v1");
        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn css_cache_is_independent_of_bundle_cache() {
        let mut cache = BundleCache::new(200, usize::MAX, None);
        cache.set_bundle("/a.vue", "v1", bundle("js"));
        cache.set_css("/a.vue", "v1", "b{color:red}".to_string());
        cache.invalidate_bundle("/a.vue");
        assert!(cache.get_css("/a.vue", "v1").is_some());
    }

    #[test]
    fn clear_resets_everything() {
        let mut cache = BundleCache::new(200, usize::MAX, None);
        cache.set_bundle("/a.ts", "v1", bundle("k1"));
        cache.set_css("/a.ts", "v1", "b{}".to_string());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get_stats().hits, 0);
    }
}
