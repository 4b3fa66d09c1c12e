//! BM25 inverted full-text index: tokenization, incremental postings
//! maintenance, and IDF⁺ scoring.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::filter::Filter;
use crate::metadata::Metadata;
use crate::{Error, Result};

/// Texts longer than this are rejected rather than tokenized, so one
/// oversized document can't blow up a namespace's postings memory.
pub const MAX_TEXT_BYTES: usize = 1 << 20;

/// Scoring constants. The spec's `k1 = 1.5` differs from the commonly used
/// `1.2` default; `b = 0.75` is the usual length-normalization weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

struct Document {
    term_freqs: FxHashMap<String, u32>,
    length: u32,
}

struct Inner {
    postings: FxHashMap<String, FxHashMap<u64, u32>>,
    documents: FxHashMap<u64, Document>,
    metadata: FxHashMap<u64, Metadata>,
    total_doc_length: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            postings: FxHashMap::default(),
            documents: FxHashMap::default(),
            metadata: FxHashMap::default(),
            total_doc_length: 0,
        }
    }

    fn doc_count(&self) -> usize {
        self.documents.len()
    }

    fn avg_doc_length(&self) -> f32 {
        if self.documents.is_empty() {
            0.0
        } else {
            self.total_doc_length as f32 / self.documents.len() as f32
        }
    }
}

/// A single scored hit from [`Bm25Index::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Hit {
    pub id: u64,
    pub score: f32,
}

/// Lowercases, splits on non-alphanumeric runes, and drops tokens shorter
/// than 2 characters. No stemming, no stop-word list.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| tok.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// A BM25 inverted index over a document collection. All public operations
/// take an exclusive lock for mutation and a shared lock for reads, so
/// readers observe a consistent snapshot of the postings and average
/// length.
pub struct Bm25Index {
    params: Bm25Params,
    inner: RwLock<Inner>,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl Bm25Index {
    #[must_use]
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Indexes `text` under `id`, removing any prior postings for `id`
    /// first (so this doubles as an update).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `text` exceeds [`MAX_TEXT_BYTES`];
    /// the caller's prior postings for `id`, if any, are left untouched.
    pub fn add_document(&self, id: u64, text: &str, metadata: Metadata) -> Result<()> {
        if text.len() > MAX_TEXT_BYTES {
            return Err(Error::InvalidInput(format!(
                "text for id {id} is {} bytes, exceeds the {MAX_TEXT_BYTES}-byte limit",
                text.len()
            )));
        }

        let mut inner = self.inner.write();
        Self::remove_locked(&mut inner, id);

        let tokens = tokenize(text);
        let length = tokens.len() as u32;
        let mut term_freqs: FxHashMap<String, u32> = FxHashMap::default();
        for tok in tokens {
            *term_freqs.entry(tok).or_insert(0) += 1;
        }
        for (term, tf) in &term_freqs {
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .insert(id, *tf);
        }
        inner.total_doc_length += u64::from(length);
        inner.metadata.insert(id, metadata);
        inner.documents.insert(id, Document { term_freqs, length });
        Ok(())
    }

    /// Removes `id`'s postings and deletes any term bucket left empty.
    pub fn remove_document(&self, id: u64) {
        let mut inner = self.inner.write();
        Self::remove_locked(&mut inner, id);
    }

    fn remove_locked(inner: &mut Inner, id: u64) {
        let Some(doc) = inner.documents.remove(&id) else {
            return;
        };
        inner.total_doc_length -= u64::from(doc.length);
        inner.metadata.remove(&id);
        for term in doc.term_freqs.keys() {
            if let Some(bucket) = inner.postings.get_mut(term) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    inner.postings.remove(term);
                }
            }
        }
    }

    /// Scores and ranks documents against `query`, returning the top `k`
    /// descending by score. Only documents containing at least one query
    /// term are returned, and `filter` is applied during accumulation.
    ///
    /// # Errors
    ///
    /// Propagates filter evaluation is infallible; reserved for future
    /// query-parse failures.
    pub fn search(&self, query: &str, k: usize, filter: Option<&Filter>) -> Result<Vec<Bm25Hit>> {
        let inner = self.inner.read();
        let query_terms = tokenize(query);
        let n = inner.doc_count() as f32;
        let avg_dl = inner.avg_doc_length();

        let mut scores: FxHashMap<u64, f32> = FxHashMap::default();
        for term in &query_terms {
            let Some(bucket) = inner.postings.get(term) else {
                continue;
            };
            let df = bucket.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (&id, &tf) in bucket {
                if let Some(f) = filter {
                    let matches = inner.metadata.get(&id).is_some_and(|m| f.matches(m));
                    if !matches {
                        continue;
                    }
                }
                let dl = inner.documents[&id].length as f32;
                let denom = tf as f32 + self.params.k1 * (1.0 - self.params.b + self.params.b * dl / avg_dl.max(1.0));
                let contribution = idf * (tf as f32 * (self.params.k1 + 1.0)) / denom;
                *scores.entry(id).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<Bm25Hit> = scores.into_iter().map(|(id, score)| Bm25Hit { id, score }).collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id)));
        ranked.truncate(k);
        Ok(ranked)
    }

    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.inner.read().doc_count()
    }

    #[must_use]
    pub fn avg_doc_length(&self) -> f32 {
        self.inner.read().avg_doc_length()
    }

    /// `true` iff `term` has at least one posting, the invariant
    /// "`postings[t]` is non-empty iff some doc contains `t`" depends on.
    #[must_use]
    pub fn has_term(&self, term: &str) -> bool {
        self.inner
            .read()
            .postings
            .get(term)
            .is_some_and(|bucket| !bucket.is_empty())
    }
}

#[cfg(test)]
mod bm25_tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_splits_and_drops_short_tokens() {
        let toks = tokenize("Vector DB, a fast engine! x 2.0");
        assert_eq!(toks, vec!["vector", "db", "fast", "engine", "2", "0"]);
    }

    #[test]
    fn search_returns_only_docs_with_query_term() {
        let idx = Bm25Index::default();
        idx.add_document(1, "vector database engine", Metadata::new()).unwrap();
        idx.add_document(2, "completely unrelated text", Metadata::new()).unwrap();
        let hits = idx.search("vector", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn scores_are_non_increasing() {
        let idx = Bm25Index::default();
        idx.add_document(1, "vector search vector search vector", Metadata::new()).unwrap();
        idx.add_document(2, "vector database", Metadata::new()).unwrap();
        idx.add_document(3, "search engine basics", Metadata::new()).unwrap();
        let hits = idx.search("vector search", 10, None).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn filter_restricts_results() {
        let idx = Bm25Index::default();
        let mut db_meta = Metadata::new();
        db_meta.insert("category".to_string(), crate::metadata::Value::String("db".to_string()));
        let mut search_meta = Metadata::new();
        search_meta.insert("category".to_string(), crate::metadata::Value::String("search".to_string()));
        idx.add_document(1, "vector database", db_meta).unwrap();
        idx.add_document(2, "vector search", search_meta).unwrap();

        let filter = Filter::Equals("category".to_string(), crate::metadata::Value::String("db".to_string()));
        let hits = idx.search("vector", 10, Some(&filter)).unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn remove_deletes_empty_term_buckets() {
        let idx = Bm25Index::default();
        idx.add_document(1, "unique_term_here", Metadata::new()).unwrap();
        assert!(idx.has_term("unique_term_here"));
        idx.remove_document(1);
        assert!(!idx.has_term("unique_term_here"));
        assert_eq!(idx.doc_count(), 0);
    }

    #[test]
    fn avg_doc_length_matches_invariant() {
        let idx = Bm25Index::default();
        idx.add_document(1, "one two three", Metadata::new()).unwrap();
        idx.add_document(2, "four five", Metadata::new()).unwrap();
        assert!((idx.avg_doc_length() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn readd_under_same_id_replaces_postings() {
        let idx = Bm25Index::default();
        idx.add_document(1, "alpha beta", Metadata::new()).unwrap();
        idx.add_document(1, "gamma delta", Metadata::new()).unwrap();
        assert!(!idx.has_term("alpha"));
        assert!(idx.has_term("gamma"));
        assert_eq!(idx.doc_count(), 1);
    }

    #[test]
    fn oversized_text_is_rejected_and_leaves_prior_postings_intact() {
        let idx = Bm25Index::default();
        idx.add_document(1, "alpha beta", Metadata::new()).unwrap();
        let oversized = "x ".repeat(MAX_TEXT_BYTES);
        let err = idx.add_document(1, &oversized, Metadata::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(idx.has_term("alpha"));
        assert_eq!(idx.doc_count(), 1);
    }
}
