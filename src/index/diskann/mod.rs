//! Batch-built, two-tier ANN index in the DiskANN style: a small
//! in-memory routing graph anchored at the dataset medoid, routing into a
//! larger graph of PQ-coded neighbors persisted to disk via [`codec`].

pub mod codec;

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::distance::DistanceMetric;
use crate::heap::{Candidate, MaxHeap, MinHeap};
use crate::index::pq::ProductQuantizer;
use crate::{Error, Result};

use codec::{build_offset_index, read_record_at, write_node_file, DiskRecord};

/// Parameters for construction and search of a [`DiskAnnIndex`].
#[derive(Debug, Clone, Copy)]
pub struct DiskAnnConfig {
    /// Max degree of the Vamana graph.
    pub r: usize,
    /// Candidate list size for greedy search (construction and the
    /// memory-tier entry search).
    pub l: usize,
    /// Candidates expanded per beam search iteration.
    pub beam_width: usize,
    /// RNG-pruning slack factor.
    pub alpha: f32,
    /// PQ subspace count.
    pub m: usize,
    /// PQ bits per subspace.
    pub bits: u32,
    /// Size of the in-memory routing tier.
    pub max_memory_tier: usize,
}

impl Default for DiskAnnConfig {
    fn default() -> Self {
        Self {
            r: 64,
            l: 100,
            beam_width: 8,
            alpha: 1.2,
            m: 16,
            bits: 8,
            max_memory_tier: 10_000,
        }
    }
}

struct MemoryTier {
    medoid: u64,
    vectors: FxHashMap<u64, Vec<f32>>,
    edges: FxHashMap<u64, Vec<u64>>,
}

struct BuiltState {
    pq: ProductQuantizer,
    memory: MemoryTier,
    /// Full-precision vectors kept for the §4.E re-ranking step. The
    /// on-disk codec's `vector_offset` is unused here (set to -1) since
    /// crash-safe persistence of this table is a non-goal.
    full_vectors: FxHashMap<u64, Vec<f32>>,
    offsets: FxHashMap<u64, u64>,
    node_file: PathBuf,
}

enum State {
    Buffering {
        next_id: u64,
        vectors: FxHashMap<u64, Vec<f32>>,
    },
    Built(BuiltState),
}

/// A batch-built DiskANN-style index.
pub struct DiskAnnIndex {
    config: DiskAnnConfig,
    metric: DistanceMetric,
    dim: RwLock<Option<usize>>,
    state: RwLock<State>,
}

impl DiskAnnIndex {
    #[must_use]
    pub fn new(config: DiskAnnConfig, metric: DistanceMetric) -> Self {
        Self {
            config,
            metric,
            dim: RwLock::new(None),
            state: RwLock::new(State::Buffering {
                next_id: 0,
                vectors: FxHashMap::default(),
            }),
        }
    }

    /// Buffers `vector` for the next [`Self::build`] call.
    ///
    /// # Errors
    ///
    /// `InvalidInput` on an empty or dimension-mismatched vector;
    /// `Unsupported` if the index has already been built.
    pub fn add_vector(&self, vector: Vec<f32>) -> Result<u64> {
        if vector.is_empty() {
            return Err(Error::InvalidInput("vector must not be empty".to_string()));
        }
        let mut dim_guard = self.dim.write();
        match *dim_guard {
            Some(dim) if dim != vector.len() => {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            None => *dim_guard = Some(vector.len()),
            _ => {}
        }
        drop(dim_guard);

        let mut state = self.state.write();
        match &mut *state {
            State::Buffering { next_id, vectors } => {
                let id = *next_id;
                *next_id += 1;
                vectors.insert(id, vector);
                Ok(id)
            }
            State::Built(_) => Err(Error::Unsupported(
                "add_vector after DiskANN build".to_string(),
            )),
        }
    }

    /// Runs the five-phase batch build, writing the disk-resident graph to
    /// `node_file`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the buffer is empty; `Unsupported` if already
    /// built; propagates PQ training and I/O errors.
    pub fn build(&self, node_file: impl AsRef<Path>) -> Result<()> {
        let mut state = self.state.write();
        let (vectors,) = match &*state {
            State::Buffering { vectors, .. } => {
                if vectors.is_empty() {
                    return Err(Error::InvalidInput("cannot build on an empty buffer".to_string()));
                }
                (vectors.clone(),)
            }
            State::Built(_) => return Err(Error::Unsupported("index already built".to_string())),
        };

        // Phase 1: train PQ on the buffer.
        let ids: Vec<u64> = vectors.keys().copied().collect();
        let samples: Vec<Vec<f32>> = ids.iter().map(|id| vectors[id].clone()).collect();
        let pq = ProductQuantizer::train(&samples, self.config.m, self.config.bits, 0xA5A5_1234)?;

        // Phase 2: encode every buffered vector.
        let codes: FxHashMap<u64, Vec<u8>> = ids
            .iter()
            .map(|&id| (id, pq.encode(&vectors[&id]).expect("dims validated at add_vector")))
            .collect();

        // Phase 3: build the Vamana-style working graph via RNG-pruned
        // greedy insertion, anchored at the approximate medoid.
        let medoid = approximate_medoid(&vectors, self.metric);
        let graph = build_vamana_graph(&vectors, self.metric, self.config.r, self.config.alpha);

        // Phase 4: select the memory-resident tier.
        let mut by_distance: Vec<(u64, f32)> = ids
            .iter()
            .map(|&id| (id, self.metric.distance_unchecked(&vectors[&medoid], &vectors[&id])))
            .collect();
        by_distance.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let tier_size = self.config.max_memory_tier.min(by_distance.len());
        let tier_ids: FxHashSet<u64> = by_distance.iter().take(tier_size).map(|(id, _)| *id).collect();
        let memory_vectors: FxHashMap<u64, Vec<f32>> =
            tier_ids.iter().map(|&id| (id, vectors[&id].clone())).collect();
        let memory_edges: FxHashMap<u64, Vec<u64>> = tier_ids
            .iter()
            .map(|&id| {
                let edges = graph[&id].iter().copied().filter(|n| tier_ids.contains(n)).collect();
                (id, edges)
            })
            .collect();

        // Phase 5: write every node (full Vamana edges + PQ code) to disk.
        let records: Vec<DiskRecord> = ids
            .iter()
            .map(|&id| DiskRecord {
                id,
                neighbors: graph[&id].clone(),
                pq_code: codes[&id].clone(),
                vector_offset: -1,
            })
            .collect();
        let node_file = node_file.as_ref().to_path_buf();
        write_node_file(&node_file, &records)?;
        let offsets = build_offset_index(&node_file)?;

        *state = State::Built(BuiltState {
            pq,
            memory: MemoryTier {
                medoid,
                vectors: memory_vectors,
                edges: memory_edges,
            },
            full_vectors: vectors,
            offsets,
            node_file,
        });
        Ok(())
    }

    /// Searches for the `k` approximate nearest neighbors of `query`.
    ///
    /// # Errors
    ///
    /// `NotReady` before [`Self::build`]; `DimensionMismatch` on a wrong
    /// query length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Candidate>> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be greater than 0".to_string()));
        }
        let state = self.state.read();
        let State::Built(built) = &*state else {
            return Err(Error::NotReady("search before DiskANN build".to_string()));
        };
        if query.len() != built.pq.dim() {
            return Err(Error::DimensionMismatch {
                expected: built.pq.dim(),
                actual: query.len(),
            });
        }

        // Phase 1: greedy search of the memory graph from the medoid.
        let entry_candidates = self.greedy_memory_search(built, query, self.config.l);

        // Phase 2: beam search over the disk graph using the PQ distance table.
        let table = built.pq.distance_table(query)?;
        let mut frontier = MinHeap::new();
        let mut visited: FxHashSet<u64> = FxHashSet::default();
        let mut best = MaxHeap::new();
        for c in &entry_candidates {
            frontier.push(*c);
        }

        while !frontier.is_empty() {
            let mut batch = Vec::with_capacity(self.config.beam_width);
            while batch.len() < self.config.beam_width {
                match frontier.pop() {
                    Some(c) if visited.insert(c.id) => batch.push(c.id),
                    Some(_) => continue,
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            for id in batch {
                let record = match self.read_record_with_fallback(built, id) {
                    Some(r) => r,
                    None => continue,
                };
                let pq_distance = ProductQuantizer::asymmetric_distance(&table, &record.pq_code);
                best.push_bounded(Candidate::new(id, pq_distance), 2 * k);
                for &neighbor in &record.neighbors {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    if let Some(nrec) = self.read_record_with_fallback(built, neighbor) {
                        let d = ProductQuantizer::asymmetric_distance(&table, &nrec.pq_code);
                        frontier.push(Candidate::new(neighbor, d));
                    }
                }
            }
        }

        // Phase 3: re-rank the top 2k using full-precision vectors.
        let mut reranked: Vec<Candidate> = best
            .into_sorted_vec()
            .into_iter()
            .filter_map(|c| {
                built
                    .full_vectors
                    .get(&c.id)
                    .map(|v| Candidate::new(c.id, self.metric.distance_unchecked(query, v)))
            })
            .collect();
        reranked.sort();
        reranked.truncate(k);
        Ok(reranked)
    }

    fn read_record_with_fallback(&self, built: &BuiltState, id: u64) -> Option<DiskRecord> {
        let offset = *built.offsets.get(&id)?;
        match read_record_at(&built.node_file, offset) {
            Ok(record) => Some(record),
            Err(first_err) => {
                warn!(id, error = %first_err, "diskann: batch read failed, retrying per-node");
                read_record_at(&built.node_file, offset).ok()
            }
        }
    }

    fn greedy_memory_search(&self, built: &BuiltState, query: &[f32], l: usize) -> Vec<Candidate> {
        let mut visited = FxHashSet::default();
        visited.insert(built.memory.medoid);
        let d0 = self
            .metric
            .distance_unchecked(query, &built.memory.vectors[&built.memory.medoid]);
        let mut candidates = MinHeap::new();
        candidates.push(Candidate::new(built.memory.medoid, d0));
        let mut results = MaxHeap::new();
        results.push(Candidate::new(built.memory.medoid, d0));

        while let Some(c) = candidates.pop() {
            if let Some(worst) = results.peek() {
                if results.len() >= l && c.distance > worst.distance {
                    break;
                }
            }
            let Some(neighbors) = built.memory.edges.get(&c.id) else {
                continue;
            };
            for &nid in neighbors {
                if !visited.insert(nid) {
                    continue;
                }
                if let Some(v) = built.memory.vectors.get(&nid) {
                    let d = self.metric.distance_unchecked(query, v);
                    candidates.push(Candidate::new(nid, d));
                    results.push_bounded(Candidate::new(nid, d), l.max(1));
                }
            }
        }
        results.into_sorted_vec()
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        matches!(&*self.state.read(), State::Built(_))
    }

    #[must_use]
    pub fn size(&self) -> usize {
        match &*self.state.read() {
            State::Buffering { vectors, .. } => vectors.len(),
            State::Built(built) => built.full_vectors.len(),
        }
    }
}

fn approximate_medoid(vectors: &FxHashMap<u64, Vec<f32>>, metric: DistanceMetric) -> u64 {
    let ids: Vec<u64> = vectors.keys().copied().collect();
    let sample_size = ids.len().min(1000);
    let sample = &ids[..sample_size];

    ids.iter()
        .copied()
        .min_by(|&a, &b| {
            let avg = |id: u64| -> f32 {
                sample.iter().map(|&s| metric.distance_unchecked(&vectors[&id], &vectors[&s])).sum::<f32>()
                    / sample.len() as f32
            };
            avg(a).partial_cmp(&avg(b)).unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("vectors is non-empty, checked by caller")
}

/// Vamana-style greedy insertion with RNG occlusion pruning (`select_neighbors_RNG`):
/// a candidate is kept only if no already-selected neighbor is closer to it
/// than `alpha * d(candidate, query)`.
fn build_vamana_graph(
    vectors: &FxHashMap<u64, Vec<f32>>,
    metric: DistanceMetric,
    r: usize,
    alpha: f32,
) -> FxHashMap<u64, Vec<u64>> {
    let ids: Vec<u64> = vectors.keys().copied().collect();
    let mut graph: FxHashMap<u64, Vec<u64>> = ids.iter().map(|&id| (id, Vec::new())).collect();

    for &v in &ids {
        let mut candidates: Vec<Candidate> = ids
            .iter()
            .filter(|&&id| id != v)
            .map(|&id| Candidate::new(id, metric.distance_unchecked(&vectors[&v], &vectors[&id])))
            .collect();
        candidates.sort();

        let selected = select_neighbors_rng(&candidates, vectors, metric, r, alpha);
        graph.insert(v, selected.iter().map(|c| c.id).collect());

        for c in &selected {
            let entry = graph.get_mut(&c.id).expect("id from the dataset's id set");
            if !entry.contains(&v) {
                entry.push(v);
            }
            if entry.len() > r {
                let pruned_candidates: Vec<Candidate> = entry
                    .iter()
                    .map(|&n| Candidate::new(n, metric.distance_unchecked(&vectors[&c.id], &vectors[&n])))
                    .collect();
                let mut sorted = pruned_candidates;
                sorted.sort();
                let pruned = select_neighbors_rng(&sorted, vectors, metric, r, alpha);
                *entry = pruned.iter().map(|p| p.id).collect();
            }
        }
    }

    graph
}

fn select_neighbors_rng(
    candidates: &[Candidate],
    vectors: &FxHashMap<u64, Vec<f32>>,
    metric: DistanceMetric,
    r: usize,
    alpha: f32,
) -> Vec<Candidate> {
    let mut selected: Vec<Candidate> = Vec::with_capacity(r);
    for &candidate in candidates {
        if selected.len() >= r {
            break;
        }
        let occluded = selected.iter().any(|&s| {
            let d_s_candidate = metric.distance_unchecked(&vectors[&s.id], &vectors[&candidate.id]);
            d_s_candidate < alpha * candidate.distance
        });
        if !occluded {
            selected.push(candidate);
        }
    }
    selected
}

#[cfg(test)]
mod diskann_tests {
    use super::*;

    fn rand_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = seed;
        (0..n)
            .map(|_| {
                (0..dim)
                    .map(|_| {
                        rng ^= rng << 13;
                        rng ^= rng >> 7;
                        rng ^= rng << 17;
                        (rng % 2000) as f32 / 1000.0 - 1.0
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn search_before_build_is_not_ready() {
        let idx = DiskAnnIndex::new(DiskAnnConfig::default(), DistanceMetric::L2);
        assert!(matches!(idx.search(&[1.0], 1), Err(Error::NotReady(_))));
    }

    #[test]
    fn build_on_empty_buffer_is_invalid() {
        let idx = DiskAnnIndex::new(DiskAnnConfig::default(), DistanceMetric::L2);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            idx.build(dir.path().join("nodes.bin")),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn add_vector_after_build_is_unsupported() {
        let config = DiskAnnConfig {
            r: 8,
            l: 16,
            beam_width: 4,
            alpha: 1.2,
            m: 2,
            bits: 4,
            max_memory_tier: 50,
        };
        let idx = DiskAnnIndex::new(config, DistanceMetric::L2);
        for v in rand_vectors(40, 8, 11) {
            idx.add_vector(v).unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        idx.build(dir.path().join("nodes.bin")).unwrap();
        assert!(matches!(
            idx.add_vector(vec![1.0; 8]),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn finds_the_inserted_point_itself() {
        let config = DiskAnnConfig {
            r: 16,
            l: 32,
            beam_width: 8,
            alpha: 1.2,
            m: 4,
            bits: 8,
            max_memory_tier: 100,
        };
        let idx = DiskAnnIndex::new(config, DistanceMetric::L2);
        let vectors = rand_vectors(120, 16, 77);
        for v in &vectors {
            idx.add_vector(v.clone()).unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        idx.build(dir.path().join("nodes.bin")).unwrap();

        let query = vectors[10].clone();
        let results = idx.search(&query, 5).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().any(|c| c.id == 10));
    }
}
