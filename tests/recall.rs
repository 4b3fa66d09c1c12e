//! Quality-property integration tests: HNSW and DiskANN-style recall@10
//! against a brute-force oracle, and the HNSW self-retrieval round-trip
//! law, run on random mid-size datasets.

use std::collections::HashSet;

use vortexdb_core::distance::DistanceMetric;
use vortexdb_core::index::diskann::{DiskAnnConfig, DiskAnnIndex};
use vortexdb_core::index::hnsw::{HnswIndex, HnswParams};

/// A small xorshift64 generator so these tests need no external RNG crate.
struct Rng(u64);

impl Rng {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    fn vector(&mut self, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| self.next_f32() * 2.0 - 1.0).collect()
    }
}

fn brute_force_top_k(vectors: &[Vec<f32>], query: &[f32], k: usize) -> HashSet<usize> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(idx, v)| (idx, DistanceMetric::Cosine.distance_unchecked(query, v)))
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    scored.into_iter().take(k).map(|(idx, _)| idx).collect()
}

#[test]
fn hnsw_recall_at_10_meets_quality_bar() {
    let mut rng = Rng(0x5EED_C0FF_EE15_u64);
    let dim = 128;
    let n = 1000;

    let vectors: Vec<Vec<f32>> = (0..n).map(|_| rng.vector(dim)).collect();
    let params = HnswParams::new(16, 200);
    let index = HnswIndex::with_seed(params, DistanceMetric::Cosine, 0xABCD_EF01_2345_6789);
    for v in &vectors {
        index.insert(v.clone()).unwrap();
    }

    let queries = 50;
    let mut total_recall = 0.0;
    for _ in 0..queries {
        let query = rng.vector(dim);
        let truth = brute_force_top_k(&vectors, &query, 10);
        let approx: HashSet<u64> = index.search(&query, 10, 100).unwrap().into_iter().map(|r| r.id).collect();
        let hits = truth.iter().filter(|idx| approx.contains(&(**idx as u64))).count();
        total_recall += hits as f64 / 10.0;
    }

    let recall = total_recall / f64::from(queries);
    assert!(recall >= 0.90, "HNSW recall@10 = {recall}, expected >= 0.90");
}

#[test]
fn hnsw_self_retrieval_round_trip_holds_for_at_least_95_percent() {
    let mut rng = Rng(0x0DD1_7357_u64);
    let dim = 128;
    let n = 1000;

    let vectors: Vec<Vec<f32>> = (0..n).map(|_| rng.vector(dim)).collect();
    let params = HnswParams::new(16, 200);
    let index = HnswIndex::with_seed(params, DistanceMetric::Cosine, 0x1122_3344_5566_7788);
    let ids: Vec<u64> = vectors.iter().map(|v| index.insert(v.clone()).unwrap()).collect();

    let mut hits = 0;
    for (v, &id) in vectors.iter().zip(&ids) {
        let results = index.search(v, 1, 64).unwrap();
        if results.first().is_some_and(|r| r.id == id && r.distance < 0.01) {
            hits += 1;
        }
    }

    let rate = f64::from(hits) / f64::from(n);
    assert!(rate >= 0.95, "self-retrieval round trip held for {rate}, expected >= 0.95");
}

#[test]
fn diskann_recall_at_10_meets_quality_bar_under_pq_compression() {
    let dir = tempfile::tempdir().unwrap();
    let node_file = dir.path().join("graph.bin");

    let mut rng = Rng(0x1357_9BDF_2468_ACE0);
    let dim = 64;
    let n = 300;
    let vectors: Vec<Vec<f32>> = (0..n).map(|_| rng.vector(dim)).collect();

    let config = DiskAnnConfig {
        r: 64,
        l: 100,
        beam_width: 8,
        alpha: 1.2,
        m: 16,
        bits: 8,
        max_memory_tier: 10_000,
    };
    let index = DiskAnnIndex::new(config, DistanceMetric::Cosine);
    for v in &vectors {
        index.add_vector(v.clone()).unwrap();
    }
    index.build(&node_file).unwrap();

    let queries = 30;
    let mut total_recall = 0.0;
    for _ in 0..queries {
        let query = rng.vector(dim);
        let truth = brute_force_top_k(&vectors, &query, 10);
        let approx: HashSet<u64> = index.search(&query, 10).unwrap().into_iter().map(|c| c.id).collect();
        let hits = truth.iter().filter(|idx| approx.contains(&(**idx as u64))).count();
        total_recall += hits as f64 / 10.0;
    }

    let recall = total_recall / f64::from(queries);
    assert!(recall >= 0.70, "DiskANN recall@10 = {recall}, expected >= 0.70");
}
