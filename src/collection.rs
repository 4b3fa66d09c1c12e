//! Namespace-scoped facade wiring HNSW, BM25, the query cache and the
//! fusion layer behind the operations exposed to the transport layer.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::batch;
use crate::cache::{cache_key, Channel};
use crate::config::EngineConfig;
use crate::filter::Filter;
use crate::fusion::{self, FusionMethod};
use crate::index::hnsw::SearchQuality;
use crate::metadata::Metadata;
use crate::point::{Point, SearchResult};
use crate::registry::{NamespaceStats, Registry};
use crate::{Error, Result};

/// Outcome of a `BatchInsert` call.
pub struct BatchInsertOutcome {
    pub inserted: usize,
    pub failed: usize,
    pub ids: Vec<Option<u64>>,
    pub errors: Vec<(usize, String)>,
    pub total_ms: u128,
}

/// Aggregated totals returned by `GetStats`.
pub struct Stats {
    pub total_vectors: usize,
    pub per_namespace: Vec<(String, NamespaceStats)>,
}

/// `{healthy, uptime_s, details}` returned by `HealthCheck`.
pub struct Health {
    pub healthy: bool,
    pub uptime_s: u64,
    pub details: String,
}

/// The top-level entry point: a registry of namespaces plus the engine
/// configuration new namespaces are built from.
pub struct Collection {
    registry: Registry,
    started_at: Instant,
}

impl Collection {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: Registry::new(config),
            started_at: Instant::now(),
        }
    }

    /// `Insert(namespace, vector, text?, metadata) -> id`. Creates the
    /// namespace on demand. A failed text-index update is logged and does
    /// not fail the insert — the vector channel is the primary truth.
    pub fn insert(&self, ns: &str, vector: Vec<f32>, text: Option<&str>, metadata: Metadata) -> Result<u64> {
        let namespace = self.registry.get_or_init(ns);
        let id = namespace.hnsw.insert(vector)?;
        namespace.metadata.write().insert(id, metadata.clone());
        if let Some(text) = text {
            if let Err(err) = namespace.bm25.add_document(id, text, metadata) {
                warn!(namespace = ns, id, error = %err, "text index update failed");
            }
        }
        namespace.cache.clear();
        debug!(namespace = ns, id, "inserted point");
        Ok(id)
    }

    /// Convenience wrapper over [`Collection::insert`] taking a [`Point`].
    /// `point.id` is ignored — the engine assigns the authoritative id.
    pub fn insert_point(&self, ns: &str, point: Point) -> Result<u64> {
        self.insert(ns, point.vector, point.text.as_deref(), point.metadata)
    }

    /// `Search(namespace, query_vector, k, efSearch?, filter?)`.
    pub fn search(&self, ns: &str, query: &[f32], k: usize, ef_search: Option<usize>, filter: Option<&Filter>) -> Result<Vec<SearchResult>> {
        let namespace = self.registry.get(ns).ok_or_else(|| Error::NotFound(format!("namespace '{ns}'")))?;
        let ef = ef_search.unwrap_or_else(|| SearchQuality::Balanced.ef_search(k));

        let key = cache_key(Channel::Vector, Some(query), None, k, ef);
        if let Some(cached) = namespace.cache.get(&key) {
            return Ok(cached);
        }

        let raw = namespace.hnsw.search(query, k, ef)?;
        let meta = namespace.metadata.read();
        let mut results: Vec<SearchResult> = raw
            .into_iter()
            .filter(|hit| match filter {
                Some(f) => meta.get(&hit.id).is_some_and(|m| f.matches(m)),
                None => true,
            })
            .map(|hit| {
                let result = SearchResult::new(hit.id, hit.distance);
                match meta.get(&hit.id) {
                    Some(m) => result.with_metadata(m.clone()),
                    None => result,
                }
            })
            .collect();
        drop(meta);
        results.truncate(k);

        namespace.cache.put(key, results.clone());
        Ok(results)
    }

    /// `HybridSearch(namespace, query_vector, query_text, k, efSearch?, filter?, α?, β?, fusion?)`.
    pub fn hybrid_search(
        &self,
        ns: &str,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        ef_search: Option<usize>,
        filter: Option<&Filter>,
        method: FusionMethod,
    ) -> Result<Vec<SearchResult>> {
        let namespace = self.registry.get(ns).ok_or_else(|| Error::NotFound(format!("namespace '{ns}'")))?;
        let ef = ef_search.unwrap_or_else(|| SearchQuality::Balanced.ef_search(k));

        let key = cache_key(Channel::Hybrid, Some(query_vector), Some(query_text), k, ef);
        if let Some(cached) = namespace.cache.get(&key) {
            return Ok(cached);
        }

        let fused = fusion::hybrid_search(
            |budget| {
                namespace
                    .hnsw
                    .search(query_vector, budget, ef.max(budget))
                    .map(|hits| hits.into_iter().map(|h| (h.id, h.distance)).collect())
            },
            |budget| namespace.bm25.search(query_text, budget, None).map(|hits| hits.into_iter().map(|h| (h.id, h.score)).collect()),
            k,
            method,
        )?;

        let meta = namespace.metadata.read();
        let results: Vec<SearchResult> = fused
            .into_iter()
            .filter(|f| match filter {
                Some(flt) => meta.get(&f.id).is_some_and(|m| flt.matches(m)),
                None => true,
            })
            .map(|f| {
                let result = SearchResult::new(f.id, f.score).with_channel_scores(f.vector_score, f.text_score);
                match meta.get(&f.id) {
                    Some(m) => result.with_metadata(m.clone()),
                    None => result,
                }
            })
            .take(k)
            .collect();
        drop(meta);

        namespace.cache.put(key, results.clone());
        Ok(results)
    }

    /// `Delete(namespace, id)`. Delete-by-filter is unsupported; see §6.
    pub fn delete(&self, ns: &str, id: u64) -> Result<usize> {
        let namespace = self.registry.get(ns).ok_or_else(|| Error::NotFound(format!("namespace '{ns}'")))?;
        namespace.hnsw.delete(id)?;
        namespace.metadata.write().remove(&id);
        namespace.bm25.remove_document(id);
        namespace.cache.clear();
        Ok(1)
    }

    pub fn delete_by_filter(&self, _ns: &str, _filter: &Filter) -> Result<usize> {
        Err(Error::Unsupported("delete-by-filter".to_string()))
    }

    /// `Update(namespace, id, vector?, text?, metadata?)`. Preserves `id`
    /// when no vector is supplied; otherwise performs delete+reinsert and
    /// returns the new id. The namespace metadata lock is held across the
    /// text remove-and-reindex to avoid racing a concurrent update.
    pub fn update(&self, ns: &str, id: u64, vector: Option<Vec<f32>>, text: Option<&str>, metadata: Option<Metadata>) -> Result<u64> {
        let namespace = self.registry.get(ns).ok_or_else(|| Error::NotFound(format!("namespace '{ns}'")))?;

        let new_id = match vector {
            Some(v) => namespace.hnsw.update(id, v)?,
            None => {
                if namespace.hnsw.get_vector(id).is_none() {
                    return Err(Error::NotFound(format!("id {id} in namespace '{ns}'")));
                }
                id
            }
        };

        let mut meta_guard = namespace.metadata.write();
        if new_id != id {
            if let Some(old) = meta_guard.remove(&id) {
                meta_guard.insert(new_id, metadata.clone().unwrap_or(old));
            } else if let Some(m) = metadata.clone() {
                meta_guard.insert(new_id, m);
            }
        } else if let Some(m) = metadata.clone() {
            meta_guard.insert(new_id, m);
        }
        let effective_metadata = meta_guard.get(&new_id).cloned().unwrap_or_default();
        drop(meta_guard);

        if new_id != id {
            namespace.bm25.remove_document(id);
        }
        if let Some(text) = text {
            if let Err(err) = namespace.bm25.add_document(new_id, text, effective_metadata) {
                warn!(namespace = ns, id = new_id, error = %err, "text index update failed");
            }
        }

        namespace.cache.clear();
        Ok(new_id)
    }

    /// `BatchInsert(stream of Insert items)`. Fans out across a fixed
    /// worker pool; one item's failure never cancels the rest.
    #[must_use]
    pub fn batch_insert(&self, ns: &str, items: Vec<Point>, workers: usize) -> BatchInsertOutcome {
        self.batch_insert_with_progress(ns, items, workers, None)
    }

    pub fn batch_insert_with_progress(
        &self,
        ns: &str,
        items: Vec<Point>,
        workers: usize,
        progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    ) -> BatchInsertOutcome {
        let namespace = self.registry.get_or_init(ns);
        let namespace_for_op = Arc::clone(&namespace);
        let outcome = batch::run(
            items,
            workers,
            move |_idx, item| -> Result<u64> {
                let id = namespace_for_op.hnsw.insert(item.vector)?;
                namespace_for_op.metadata.write().insert(id, item.metadata.clone());
                if let Some(text) = &item.text {
                    if let Err(err) = namespace_for_op.bm25.add_document(id, text, item.metadata) {
                        warn!(id, error = %err, "text index update failed");
                    }
                }
                Ok(id)
            },
            progress,
        );
        namespace.cache.clear();

        let mut ids = Vec::with_capacity(outcome.results.len());
        let mut errors = Vec::new();
        for (idx, result) in outcome.results.into_iter().enumerate() {
            match result {
                Ok(id) => ids.push(Some(id)),
                Err(err) => {
                    warn!(namespace = ns, index = idx, error = %err, "batch insert item failed");
                    errors.push((idx, err.to_string()));
                    ids.push(None);
                }
            }
        }

        BatchInsertOutcome {
            inserted: outcome.succeeded,
            failed: outcome.failed,
            ids,
            errors,
            total_ms: outcome.total_ms,
        }
    }

    /// `GetStats(namespace?)`. With `ns` set, only that namespace is
    /// reported (if it has been created); otherwise every known namespace.
    #[must_use]
    pub fn stats(&self, ns: Option<&str>) -> Stats {
        let names = match ns {
            Some(name) => vec![name.to_string()],
            None => self.registry.namespace_names(),
        };
        let per_namespace: Vec<(String, NamespaceStats)> = names
            .into_iter()
            .filter_map(|name| self.registry.get(&name).map(|namespace| (name, namespace.stats())))
            .collect();
        Stats {
            total_vectors: self.registry.total_vectors(),
            per_namespace,
        }
    }

    /// `HealthCheck()`.
    #[must_use]
    pub fn health(&self) -> Health {
        Health {
            healthy: true,
            uptime_s: self.started_at.elapsed().as_secs(),
            details: format!("{} namespace(s)", self.registry.namespace_names().len()),
        }
    }
}

#[cfg(test)]
mod collection_tests {
    use super::*;

    fn collection() -> Collection {
        Collection::new(EngineConfig::default())
    }

    #[test]
    fn insert_then_search_identical_matches_end_to_end_scenario() {
        let c = collection();
        let id = c.insert("ns", vec![1.0, 0.0, 0.0], None, Metadata::new()).unwrap();
        assert_eq!(id, 0);
        let results = c.search("ns", &[1.0, 0.0, 0.0], 1, None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 0);
        assert!(results[0].score <= 0.01);
    }

    #[test]
    fn oversized_text_fails_the_text_index_but_not_the_insert() {
        let c = collection();
        let oversized = "x ".repeat(crate::index::bm25::MAX_TEXT_BYTES);
        let id = c.insert("ns", vec![1.0, 0.0], Some(&oversized), Metadata::new()).unwrap();
        let namespace = c.registry.get("ns").unwrap();
        assert_eq!(namespace.hnsw.size(), 1);
        assert_eq!(namespace.bm25.doc_count(), 0);
        let results = c.search("ns", &[1.0, 0.0], 1, None, None).unwrap();
        assert_eq!(results[0].id, id);
    }

    #[test]
    fn cache_hit_accounting_matches_end_to_end_scenario() {
        let c = collection();
        c.insert("ns", vec![1.0, 0.0], Some("hello world"), Metadata::new()).unwrap();
        c.insert("ns", vec![0.0, 1.0], Some("goodbye world"), Metadata::new()).unwrap();

        let first = c.hybrid_search("ns", &[1.0, 0.0], "hello", 5, None, None, FusionMethod::Rrf { rrf_k: 60.0, alpha: 0.5, beta: 0.5 }).unwrap();
        let second = c.hybrid_search("ns", &[1.0, 0.0], "hello", 5, None, None, FusionMethod::Rrf { rrf_k: 60.0, alpha: 0.5, beta: 0.5 }).unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), second.iter().map(|r| r.id).collect::<Vec<_>>());

        let namespace = c.registry.get("ns").unwrap();
        let stats = namespace.cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn delete_removes_from_both_channels_and_clears_cache() {
        let c = collection();
        let id = c.insert("ns", vec![1.0, 0.0], Some("term"), Metadata::new()).unwrap();
        c.search("ns", &[1.0, 0.0], 1, None, None).unwrap();
        c.delete("ns", id).unwrap();
        let namespace = c.registry.get("ns").unwrap();
        assert_eq!(namespace.hnsw.size(), 0);
        assert!(!namespace.bm25.has_term("term"));
        assert_eq!(namespace.cache.stats().size, 0);
    }

    #[test]
    fn delete_by_filter_is_unsupported() {
        let c = collection();
        c.insert("ns", vec![1.0], None, Metadata::new()).unwrap();
        let filter = Filter::Exists("x".to_string());
        assert!(matches!(c.delete_by_filter("ns", &filter), Err(Error::Unsupported(_))));
    }

    #[test]
    fn update_without_vector_preserves_id() {
        let c = collection();
        let id = c.insert("ns", vec![1.0, 0.0], None, Metadata::new()).unwrap();
        let mut meta = Metadata::new();
        meta.insert("k".to_string(), crate::metadata::Value::Int(1));
        let new_id = c.update("ns", id, None, None, Some(meta)).unwrap();
        assert_eq!(new_id, id);
    }

    #[test]
    fn update_with_vector_returns_new_id() {
        let c = collection();
        let id = c.insert("ns", vec![1.0, 0.0], None, Metadata::new()).unwrap();
        let new_id = c.update("ns", id, Some(vec![0.0, 1.0]), None, None).unwrap();
        assert_ne!(new_id, id);
        assert!(c.registry.get("ns").unwrap().hnsw.get_vector(id).is_none());
    }

    #[test]
    fn bm25_filter_correctness_matches_end_to_end_scenario() {
        let c = collection();
        let mut db_meta = Metadata::new();
        db_meta.insert("category".to_string(), crate::metadata::Value::String("db".to_string()));
        let mut search_meta = Metadata::new();
        search_meta.insert("category".to_string(), crate::metadata::Value::String("search".to_string()));

        c.insert("ns", vec![1.0], Some("vector database"), db_meta).unwrap();
        c.insert("ns", vec![2.0], Some("vector search"), search_meta).unwrap();

        let namespace = c.registry.get("ns").unwrap();
        let filter = Filter::Equals("category".to_string(), crate::metadata::Value::String("db".to_string()));
        let meta = namespace.metadata.read();
        let hits = namespace.bm25.search("vector", 10, None).unwrap();
        let filtered: Vec<u64> = hits.into_iter().filter(|h| meta.get(&h.id).is_some_and(|m| filter.matches(m))).map(|h| h.id).collect();
        assert_eq!(filtered, vec![0]);
    }

    #[test]
    fn batch_recovery_matches_end_to_end_scenario() {
        let c = collection();
        let mut items = Vec::new();
        for i in 0..100usize {
            let dim = if i == 37 { 5 } else { 4 };
            items.push(Point::new(i as u64, vec![i as f32; dim]));
        }
        let outcome = c.batch_insert("ns", items, 8);
        assert_eq!(outcome.inserted, 99);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, 37);
        let namespace = c.registry.get("ns").unwrap();
        assert_eq!(namespace.hnsw.size(), 99);
    }

    #[test]
    fn search_on_unknown_namespace_is_not_found() {
        let c = collection();
        assert!(matches!(c.search("missing", &[1.0], 1, None, None), Err(Error::NotFound(_))));
    }

    #[test]
    fn insert_point_ignores_the_supplied_id() {
        let c = collection();
        let point = Point::new(999, vec![1.0, 0.0]).with_text("hello");
        let id = c.insert_point("ns", point).unwrap();
        assert_eq!(id, 0);
    }

    #[test]
    fn health_check_reports_healthy() {
        let c = collection();
        let health = c.health();
        assert!(health.healthy);
    }
}
