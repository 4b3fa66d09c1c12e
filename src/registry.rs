//! Namespace registry: lazily creates and hands out the (HNSW, BM25,
//! cache) triple for each namespace under a single writer lock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::EngineConfig;
use crate::index::bm25::Bm25Index;
use crate::index::hnsw::HnswIndex;
use crate::metadata::Metadata;
use crate::point::SearchResult;

/// Per-namespace index triple plus the metadata map the filter engine reads.
pub struct Namespace {
    pub hnsw: HnswIndex,
    pub bm25: Bm25Index,
    pub cache: crate::cache::QueryCache<Vec<SearchResult>>,
    pub metadata: RwLock<FxHashMap<u64, Metadata>>,
}

impl Namespace {
    fn new(config: &EngineConfig) -> Self {
        Self {
            hnsw: HnswIndex::new(config.hnsw.to_params(), crate::distance::DistanceMetric::Cosine),
            bm25: Bm25Index::new(config.bm25.to_params()),
            cache: crate::cache::QueryCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_seconds)),
            metadata: RwLock::new(FxHashMap::default()),
        }
    }

    /// Per-namespace stats surfaced by `GetStats`.
    #[must_use]
    pub fn stats(&self) -> NamespaceStats {
        let hnsw_stats = self.hnsw.stats();
        let cache_stats = self.cache.stats();
        NamespaceStats {
            vector_count: hnsw_stats.size,
            dims: hnsw_stats.dim,
            cache_hits: cache_stats.hits,
            cache_misses: cache_stats.misses,
            cache_hit_rate: cache_stats.hit_rate,
        }
    }
}

/// Aggregated per-namespace counters, per the `GetStats` interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NamespaceStats {
    pub vector_count: usize,
    pub dims: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
}

/// Global registry of namespaces, the single point of lazy creation.
pub struct Registry {
    config: EngineConfig,
    namespaces: RwLock<FxHashMap<String, Arc<Namespace>>>,
}

impl Registry {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            namespaces: RwLock::new(FxHashMap::default()),
        }
    }

    /// Returns the namespace's index triple, creating it atomically under
    /// the registry's writer lock on first use.
    #[must_use]
    pub fn get_or_init(&self, ns: &str) -> Arc<Namespace> {
        {
            let namespaces = self.namespaces.read();
            if let Some(existing) = namespaces.get(ns) {
                return existing.clone();
            }
        }
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(ns.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(&self.config)))
            .clone()
    }

    /// Returns the namespace if it has already been created, without
    /// creating it.
    #[must_use]
    pub fn get(&self, ns: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(ns).cloned()
    }

    #[must_use]
    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }

    /// Aggregates `vector_count` across every namespace that has been created.
    #[must_use]
    pub fn total_vectors(&self) -> usize {
        self.namespaces.read().values().map(|ns| ns.hnsw.size()).sum()
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn get_or_init_returns_the_same_namespace_on_repeat_calls() {
        let registry = Registry::new(EngineConfig::default());
        let a = registry.get_or_init("ns1");
        let b = registry.get_or_init("ns1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_namespaces_are_independent() {
        let registry = Registry::new(EngineConfig::default());
        let a = registry.get_or_init("a");
        let b = registry.get_or_init("b");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.namespace_names().len(), 2);
    }

    #[test]
    fn get_without_init_returns_none() {
        let registry = Registry::new(EngineConfig::default());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn total_vectors_sums_across_namespaces() {
        let registry = Registry::new(EngineConfig::default());
        let a = registry.get_or_init("a");
        a.hnsw.insert(vec![1.0, 0.0]).unwrap();
        let b = registry.get_or_init("b");
        b.hnsw.insert(vec![0.0, 1.0]).unwrap();
        b.hnsw.insert(vec![1.0, 1.0]).unwrap();
        assert_eq!(registry.total_vectors(), 3);
    }
}
