//! The HNSW proximity graph: insert, search, delete, update.
//!
//! Nodes live in an arena keyed by integer id (`FxHashMap<u64, Arc<Node>>`)
//! rather than behind pointers, since the adjacency graph is inherently
//! cyclic. A lookup of a stale id (a neighbor concurrently deleted by
//! another writer) is tolerated: the traversal skips it and bumps an
//! observability counter rather than failing the whole operation.
//!
//! Locking follows two tiers: the arena itself (insertion/removal of a
//! node, and the `entry_point`/`max_layer`/`dim` bookkeeping) is guarded by
//! one `RwLock<Inner>`; each node's own adjacency lists are guarded by a
//! per-node `RwLock` so that concurrent inserts touching different nodes'
//! neighbor lists don't serialize behind a single global structure lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::distance::DistanceMetric;
use crate::heap::{Candidate, MaxHeap, MinHeap};
use crate::{Error, Result};

use super::params::HnswParams;

struct Node {
    vector: Vec<f32>,
    level: usize,
    neighbors: RwLock<Vec<Vec<u64>>>,
}

impl Node {
    fn new(vector: Vec<f32>, level: usize) -> Self {
        Self {
            vector,
            level,
            neighbors: RwLock::new(vec![Vec::new(); level + 1]),
        }
    }
}

struct Inner {
    nodes: FxHashMap<u64, Arc<Node>>,
    entry_point: Option<u64>,
    max_layer: i64,
    dim: usize,
    counter: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            nodes: FxHashMap::default(),
            entry_point: None,
            max_layer: -1,
            dim: 0,
            counter: 0,
        }
    }
}

/// A full snapshot of one node, returned by [`HnswIndex::get_node`].
#[derive(Debug, Clone, PartialEq)]
pub struct HnswNodeView {
    pub id: u64,
    pub vector: Vec<f32>,
    pub level: usize,
    pub neighbors: Vec<Vec<u64>>,
}

/// Observability snapshot for an [`HnswIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswStats {
    pub size: usize,
    pub max_layer: i64,
    pub entry_point: Option<u64>,
    pub dim: usize,
    /// Count of stale-neighbor-reference skips since construction; see the
    /// "missing neighbor reference during traversal" failure semantics.
    pub missing_neighbor_skips: u64,
    /// Always 0: this index performs true graph surgery on delete, never
    /// tombstoning. Kept for API parity with index flavors that soft-delete.
    pub tombstone_count: u64,
    pub needs_vacuum: bool,
}

/// A single ranked hit from [`HnswIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswSearchResult {
    pub id: u64,
    pub distance: f32,
}

/// A xorshift64 PRNG, avoiding a dependency on the `rand` crate for the
/// single random draw insertion needs per call.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// A value in `(0, 1]`, never exactly 0 (which would make `ln` diverge).
    fn next_open01(&mut self) -> f64 {
        let bits = self.next_u64() >> 11; // 53 significant bits
        let value = (bits as f64) / ((1u64 << 53) as f64);
        if value <= 0.0 {
            f64::from_bits(1) // smallest positive subnormal, never exactly 0
        } else {
            value
        }
    }
}

/// A multi-layer proximity graph supporting insert, search, delete, update.
pub struct HnswIndex {
    params: HnswParams,
    metric: DistanceMetric,
    inner: RwLock<Inner>,
    rng: Mutex<Xorshift64>,
    missing_neighbor_skips: AtomicU64,
}

impl HnswIndex {
    #[must_use]
    pub fn new(params: HnswParams, metric: DistanceMetric) -> Self {
        Self::with_seed(params, metric, 0xD1B5_4A32_D192_ED03)
    }

    /// Builds an index with an explicit PRNG seed, for deterministic tests.
    #[must_use]
    pub fn with_seed(params: HnswParams, metric: DistanceMetric, seed: u64) -> Self {
        Self {
            params,
            metric,
            inner: RwLock::new(Inner::new()),
            rng: Mutex::new(Xorshift64::new(seed)),
            missing_neighbor_skips: AtomicU64::new(0),
        }
    }

    fn random_level(&self) -> usize {
        let u = self.rng.lock().next_open01();
        let level = (-u.ln() * self.params.ml).floor();
        if level < 0.0 {
            0
        } else {
            level as usize
        }
    }

    /// Inserts `vector`, returning its newly assigned id.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `vector` is empty; `DimensionMismatch` if the
    /// index already has an established dimension and `vector` disagrees.
    pub fn insert(&self, vector: Vec<f32>) -> Result<u64> {
        if vector.is_empty() {
            return Err(Error::InvalidInput("vector must not be empty".to_string()));
        }
        let level = self.random_level();

        let (id, is_first, ep_opt, cur_max) = {
            let mut inner = self.inner.write();
            if inner.dim == 0 {
                inner.dim = vector.len();
            } else if inner.dim != vector.len() {
                return Err(Error::DimensionMismatch {
                    expected: inner.dim,
                    actual: vector.len(),
                });
            }
            let id = inner.counter;
            inner.counter += 1;
            let is_first = inner.nodes.is_empty();
            let ep_opt = inner.entry_point;
            let cur_max = inner.max_layer;
            inner.nodes.insert(id, Arc::new(Node::new(vector.clone(), level)));
            if is_first || level as i64 > cur_max {
                inner.entry_point = Some(id);
                inner.max_layer = level as i64;
            }
            (id, is_first, ep_opt, cur_max)
        };

        if is_first {
            debug!(id, level, "hnsw: first node becomes entry point");
            return Ok(id);
        }
        let ep = ep_opt.expect("entry point must exist for a non-empty index");

        let guard = self.inner.read();
        let mut cur = ep;
        let mut cur_dist = self
            .metric
            .distance_unchecked(&vector, &guard.nodes[&ep].vector);

        if cur_max > level as i64 {
            for l in ((level as i64 + 1)..=cur_max).rev() {
                let (next, next_dist) = self.greedy_hop(&guard, &vector, cur, cur_dist, l as usize);
                cur = next;
                cur_dist = next_dist;
            }
        }

        let top = std::cmp::min(level as i64, cur_max);
        for l in (0..=top).rev() {
            let layer = l as usize;
            let candidates = self.search_layer(&guard, &vector, cur, self.params.ef_construction, layer);
            if candidates.is_empty() {
                continue;
            }
            let max_degree = self.params.max_degree(layer);
            for c in candidates.iter().take(max_degree) {
                self.connect(&guard, id, c.id, layer);
            }
            cur = candidates[0].id;
        }

        Ok(id)
    }

    fn greedy_hop(&self, guard: &Inner, query: &[f32], mut cur: u64, mut cur_dist: f32, layer: usize) -> (u64, f32) {
        loop {
            let Some(node) = guard.nodes.get(&cur) else {
                break;
            };
            if layer > node.level {
                break;
            }
            let neighbors = node.neighbors.read()[layer].clone();
            let mut improved = false;
            for nid in neighbors {
                match guard.nodes.get(&nid) {
                    Some(n) => {
                        let d = self.metric.distance_unchecked(query, &n.vector);
                        if d < cur_dist {
                            cur = nid;
                            cur_dist = d;
                            improved = true;
                        }
                    }
                    None => {
                        self.missing_neighbor_skips.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            if !improved {
                break;
            }
        }
        (cur, cur_dist)
    }

    /// Runs the beam-style `searchLayer` algorithm at a single layer,
    /// returning candidates sorted ascending by distance.
    fn search_layer(&self, guard: &Inner, query: &[f32], entry: u64, ef: usize, layer: usize) -> Vec<Candidate> {
        let Some(entry_node) = guard.nodes.get(&entry) else {
            return Vec::new();
        };
        let mut visited: rustc_hash::FxHashSet<u64> = rustc_hash::FxHashSet::default();
        visited.insert(entry);

        let d_entry = self.metric.distance_unchecked(query, &entry_node.vector);
        let mut candidates = MinHeap::new();
        candidates.push(Candidate::new(entry, d_entry));
        let mut results = MaxHeap::new();
        results.push(Candidate::new(entry, d_entry));

        while let Some(c) = candidates.pop() {
            if let Some(worst) = results.peek() {
                if results.len() >= ef && c.distance > worst.distance {
                    break;
                }
            }
            let Some(node) = guard.nodes.get(&c.id) else {
                continue;
            };
            if layer > node.level {
                continue;
            }
            let neighbors = node.neighbors.read()[layer].clone();
            for nid in neighbors {
                if !visited.insert(nid) {
                    continue;
                }
                match guard.nodes.get(&nid) {
                    Some(n) => {
                        let d = self.metric.distance_unchecked(query, &n.vector);
                        let worse_than_worst = results
                            .peek()
                            .is_some_and(|worst| results.len() >= ef && d >= worst.distance);
                        if !worse_than_worst {
                            candidates.push(Candidate::new(nid, d));
                            results.push_bounded(Candidate::new(nid, d), ef.max(1));
                        }
                    }
                    None => {
                        trace!(neighbor = nid, "hnsw: skipping missing neighbor reference");
                        self.missing_neighbor_skips.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Adds a bidirectional edge `a <-> b` at `layer`, then prunes both
    /// endpoints back to their degree bound, keeping the pair's
    /// bidirectionality invariant intact by removing the reverse edge of
    /// any node evicted by pruning.
    fn connect(&self, guard: &Inner, a: u64, b: u64, layer: usize) {
        if a == b {
            return;
        }
        if let Some(na) = guard.nodes.get(&a) {
            let mut w = na.neighbors.write();
            if layer < w.len() && !w[layer].contains(&b) {
                w[layer].push(b);
            }
        }
        if let Some(nb) = guard.nodes.get(&b) {
            let mut w = nb.neighbors.write();
            if layer < w.len() && !w[layer].contains(&a) {
                w[layer].push(a);
            }
        }
        self.prune(guard, a, layer);
        self.prune(guard, b, layer);
    }

    fn prune(&self, guard: &Inner, node_id: u64, layer: usize) {
        let max_degree = self.params.max_degree(layer);
        let Some(node) = guard.nodes.get(&node_id) else {
            return;
        };
        if layer > node.level {
            return;
        }
        let current = node.neighbors.read()[layer].clone();
        if current.len() <= max_degree {
            return;
        }
        let mut scored: Vec<Candidate> = current
            .iter()
            .filter_map(|&nid| {
                guard
                    .nodes
                    .get(&nid)
                    .map(|n| Candidate::new(nid, self.metric.distance_unchecked(&node.vector, &n.vector)))
            })
            .collect();
        scored.sort();
        let keep: Vec<u64> = scored.iter().take(max_degree).map(|c| c.id).collect();
        let dropped: Vec<u64> = scored.iter().skip(max_degree).map(|c| c.id).collect();

        *node.neighbors.write().get_mut(layer).unwrap() = keep;
        for dropped_id in dropped {
            if let Some(dn) = guard.nodes.get(&dropped_id) {
                let mut w = dn.neighbors.write();
                if layer < w.len() {
                    w[layer].retain(|&x| x != node_id);
                }
            }
        }
    }

    /// Searches for the `k` nearest neighbors of `query`.
    ///
    /// `ef` is clamped up to `k`. Returns results ordered by ascending
    /// distance.
    ///
    /// # Errors
    ///
    /// `NotReady` if the index is empty; `DimensionMismatch` if `query`'s
    /// length disagrees with the index's established dimension.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<HnswSearchResult>> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be greater than 0".to_string()));
        }
        let guard = self.inner.read();
        if guard.nodes.is_empty() {
            return Err(Error::NotReady("search on an empty HNSW index".to_string()));
        }
        if query.is_empty() || query.len() != guard.dim {
            return Err(Error::DimensionMismatch {
                expected: guard.dim,
                actual: query.len(),
            });
        }
        let ef = ef.max(k);
        let ep = guard.entry_point.expect("non-empty index has an entry point");

        let mut cur = ep;
        let mut cur_dist = self.metric.distance_unchecked(query, &guard.nodes[&ep].vector);
        for l in (1..=guard.max_layer).rev() {
            let (next, next_dist) = self.greedy_hop(&guard, query, cur, cur_dist, l as usize);
            cur = next;
            cur_dist = next_dist;
        }

        let mut results = self.search_layer(&guard, query, cur, ef, 0);
        results.truncate(k);
        Ok(results
            .into_iter()
            .map(|c| HnswSearchResult {
                id: c.id,
                distance: c.distance,
            })
            .collect())
    }

    /// Removes `id`, unlinking every reverse edge that referenced it and
    /// repicking the entry point (as the surviving node of maximum level)
    /// if `id` was the entry point.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is not present.
    pub fn delete(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(node) = inner.nodes.get(&id).cloned() else {
            return Err(Error::NotFound(format!("hnsw node {id}")));
        };

        for layer in 0..=node.level {
            let neighbor_ids = node.neighbors.read()[layer].clone();
            for nid in neighbor_ids {
                if let Some(n) = inner.nodes.get(&nid) {
                    let mut w = n.neighbors.write();
                    if layer < w.len() {
                        w[layer].retain(|&x| x != id);
                    }
                }
            }
        }

        inner.nodes.remove(&id);

        if inner.entry_point == Some(id) {
            let replacement = inner
                .nodes
                .iter()
                .max_by_key(|(node_id, n)| (n.level, std::cmp::Reverse(**node_id)))
                .map(|(node_id, n)| (*node_id, n.level));
            match replacement {
                Some((new_id, new_level)) => {
                    inner.entry_point = Some(new_id);
                    inner.max_layer = new_level as i64;
                }
                None => {
                    inner.entry_point = None;
                    inner.max_layer = -1;
                }
            }
        }

        Ok(())
    }

    /// Delete-then-reinsert. The returned id differs from `id` (see
    /// `MODULE NOTES` on update semantics at the collection layer, which
    /// decides when to preserve the caller-visible id instead).
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is absent; errors from [`Self::insert`] otherwise.
    pub fn update(&self, id: u64, vector: Vec<f32>) -> Result<u64> {
        self.delete(id)?;
        self.insert(vector)
    }

    #[must_use]
    pub fn get_vector(&self, id: u64) -> Option<Vec<f32>> {
        self.inner.read().nodes.get(&id).map(|n| n.vector.clone())
    }

    #[must_use]
    pub fn get_node(&self, id: u64) -> Option<HnswNodeView> {
        self.inner.read().nodes.get(&id).map(|n| HnswNodeView {
            id,
            vector: n.vector.clone(),
            level: n.level,
            neighbors: n.neighbors.read().clone(),
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.read().nodes.len()
    }

    #[must_use]
    pub fn max_layer(&self) -> i64 {
        self.inner.read().max_layer
    }

    #[must_use]
    pub fn stats(&self) -> HnswStats {
        let guard = self.inner.read();
        HnswStats {
            size: guard.nodes.len(),
            max_layer: guard.max_layer,
            entry_point: guard.entry_point,
            dim: guard.dim,
            missing_neighbor_skips: self.missing_neighbor_skips.load(Ordering::Relaxed),
            tombstone_count: 0,
            needs_vacuum: false,
        }
    }
}
