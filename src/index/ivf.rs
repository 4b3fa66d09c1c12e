//! Coarse-quantized inverted file index: IVF-Flat stores raw vectors per
//! cell, IVF-PQ stores PQ-coded residuals; both query by probing the
//! `nprobe` nearest cells and merging.

use rustc_hash::FxHashMap;

use crate::filter::Filter;
use crate::heap::{Candidate, MaxHeap};
use crate::index::pq::ProductQuantizer;
use crate::metadata::Metadata;
use crate::{distance::DistanceMetric, Error, Result};

const MAX_KMEANS_ITERATIONS: usize = 25;

enum CellStorage {
    Flat(FxHashMap<u64, Vec<f32>>),
    Pq {
        pq: ProductQuantizer,
        codes: FxHashMap<u64, Vec<u8>>,
        residual_base: Vec<f32>,
    },
}

struct Cell {
    centroid: Vec<f32>,
    storage: CellStorage,
    ids: Vec<u64>,
}

/// An IVF or IVF-PQ index, trained once then queried by probing `nprobe`
/// nearest cells.
pub struct IvfIndex {
    metric: DistanceMetric,
    dim: usize,
    cells: Vec<Cell>,
    metadata: FxHashMap<u64, Metadata>,
}

impl IvfIndex {
    /// Trains an IVF-Flat index: coarse k-means into `num_centroids` cells,
    /// each storing full-precision vectors.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `vectors` is empty or `num_centroids` is 0.
    pub fn train_flat(vectors: &[(u64, Vec<f32>)], metric: DistanceMetric, num_centroids: usize) -> Result<Self> {
        let centroids = Self::train_coarse(vectors, metric, num_centroids)?;
        let mut cells: Vec<Cell> = centroids
            .into_iter()
            .map(|c| Cell {
                centroid: c,
                storage: CellStorage::Flat(FxHashMap::default()),
                ids: Vec::new(),
            })
            .collect();

        for (id, v) in vectors {
            let cell_idx = nearest_cell(&cells, v, metric);
            if let CellStorage::Flat(map) = &mut cells[cell_idx].storage {
                map.insert(*id, v.clone());
            }
            cells[cell_idx].ids.push(*id);
        }

        Ok(Self {
            metric,
            dim: vectors[0].1.len(),
            cells,
            metadata: FxHashMap::default(),
        })
    }

    /// Trains an IVF-PQ index: coarse k-means into `num_centroids` cells,
    /// each storing a PQ code of the vector's residual from its cell
    /// centroid.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `vectors` is empty or `num_centroids` is 0;
    /// propagates PQ training errors.
    pub fn train_pq(
        vectors: &[(u64, Vec<f32>)],
        metric: DistanceMetric,
        num_centroids: usize,
        pq_m: usize,
        pq_bits: u32,
    ) -> Result<Self> {
        let centroids = Self::train_coarse(vectors, metric, num_centroids)?;
        let dim = vectors[0].1.len();

        let mut assignment: Vec<usize> = Vec::with_capacity(vectors.len());
        let mut residuals: Vec<Vec<f32>> = Vec::with_capacity(vectors.len());
        for (_, v) in vectors {
            let idx = nearest_centroid_idx(&centroids, v, metric);
            assignment.push(idx);
            residuals.push(subtract(v, &centroids[idx]));
        }
        let pq_template = ProductQuantizer::train(&residuals, pq_m, pq_bits, 0x5EED_F00D)?;

        let mut cells: Vec<Cell> = centroids
            .into_iter()
            .map(|c| Cell {
                centroid: c,
                storage: CellStorage::Pq {
                    pq: pq_template.clone(),
                    codes: FxHashMap::default(),
                    residual_base: vec![0.0; dim],
                },
                ids: Vec::new(),
            })
            .collect();

        for (i, (id, _)) in vectors.iter().enumerate() {
            let cell_idx = assignment[i];
            let code = pq_template.encode(&residuals[i])?;
            if let CellStorage::Pq { codes, .. } = &mut cells[cell_idx].storage {
                codes.insert(*id, code);
            }
            cells[cell_idx].ids.push(*id);
        }

        Ok(Self {
            metric,
            dim,
            cells,
            metadata: FxHashMap::default(),
        })
    }

    /// Attaches metadata used by filtered queries.
    pub fn set_metadata(&mut self, id: u64, metadata: Metadata) {
        self.metadata.insert(id, metadata);
    }

    fn train_coarse(vectors: &[(u64, Vec<f32>)], metric: DistanceMetric, num_centroids: usize) -> Result<Vec<Vec<f32>>> {
        if vectors.is_empty() {
            return Err(Error::InvalidInput("IVF training set must not be empty".to_string()));
        }
        if num_centroids == 0 {
            return Err(Error::InvalidInput("num_centroids must be positive".to_string()));
        }
        let points: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.clone()).collect();
        Ok(kmeans(&points, num_centroids.min(points.len()), metric, 0x1357_9BDF))
    }

    /// Queries the `nprobe` nearest cells and returns the top-`k` merged
    /// results, applying `filter` during accumulation if present.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `query.len() != dim`.
    pub fn search(&self, query: &[f32], k: usize, nprobe: usize, filter: Option<&Filter>) -> Result<Vec<Candidate>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut cell_order: Vec<(usize, f32)> = self
            .cells
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.metric.distance_unchecked(query, &c.centroid)))
            .collect();
        cell_order.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut best = MaxHeap::new();
        for &(cell_idx, _) in cell_order.iter().take(nprobe.max(1)) {
            let cell = &self.cells[cell_idx];
            match &cell.storage {
                CellStorage::Flat(map) => {
                    for &id in &cell.ids {
                        if !self.passes_filter(id, filter) {
                            continue;
                        }
                        if let Some(v) = map.get(&id) {
                            let d = self.metric.distance_unchecked(query, v);
                            best.push_bounded(Candidate::new(id, d), k.max(1));
                        }
                    }
                }
                CellStorage::Pq { pq, codes, .. } => {
                    let residual_query = subtract(query, &cell.centroid);
                    let table = pq.distance_table(&residual_query)?;
                    for &id in &cell.ids {
                        if !self.passes_filter(id, filter) {
                            continue;
                        }
                        if let Some(code) = codes.get(&id) {
                            let d = ProductQuantizer::asymmetric_distance(&table, code);
                            best.push_bounded(Candidate::new(id, d), k.max(1));
                        }
                    }
                }
            }
        }

        Ok(best.into_sorted_vec())
    }

    fn passes_filter(&self, id: u64, filter: Option<&Filter>) -> bool {
        match filter {
            None => true,
            Some(f) => self.metadata.get(&id).is_some_and(|m| f.matches(m)),
        }
    }

    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.cells.iter().map(|c| c.ids.len()).sum()
    }
}

fn subtract(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

fn nearest_centroid_idx(centroids: &[Vec<f32>], v: &[f32], metric: DistanceMetric) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            metric
                .distance_unchecked(v, a)
                .partial_cmp(&metric.distance_unchecked(v, b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map_or(0, |(idx, _)| idx)
}

fn nearest_cell(cells: &[Cell], v: &[f32], metric: DistanceMetric) -> usize {
    cells
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            metric
                .distance_unchecked(v, &a.centroid)
                .partial_cmp(&metric.distance_unchecked(v, &b.centroid))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map_or(0, |(idx, _)| idx)
}

fn kmeans(points: &[Vec<f32>], k: usize, metric: DistanceMetric, seed: u64) -> Vec<Vec<f32>> {
    let dim = points[0].len();
    let k = k.max(1).min(points.len());
    let mut rng = seed;
    let mut next = move || {
        rng ^= rng << 13;
        rng ^= rng >> 7;
        rng ^= rng << 17;
        rng
    };

    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| points[(next() as usize + i) % points.len()].clone())
        .collect();

    let mut assignment = vec![0usize; points.len()];
    for _ in 0..MAX_KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let nearest = centroids
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    metric
                        .distance_unchecked(p, a)
                        .partial_cmp(&metric.distance_unchecked(p, b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map_or(0, |(idx, _)| idx);
            if nearest != assignment[i] {
                assignment[i] = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &a) in points.iter().zip(&assignment) {
            counts[a] += 1;
            for (s, &x) in sums[a].iter_mut().zip(p) {
                *s += x;
            }
        }
        for (c, (sum, count)) in centroids.iter_mut().zip(sums.into_iter().zip(counts)) {
            if count > 0 {
                for (v, s) in c.iter_mut().zip(sum) {
                    *v = s / count as f32;
                }
            }
        }

        if !changed {
            break;
        }
    }

    centroids
}

#[cfg(test)]
mod ivf_tests {
    use super::*;

    fn dataset(n: usize, dim: usize, seed: u64) -> Vec<(u64, Vec<f32>)> {
        let mut rng = seed;
        (0..n)
            .map(|i| {
                let v = (0..dim)
                    .map(|_| {
                        rng ^= rng << 13;
                        rng ^= rng >> 7;
                        rng ^= rng << 17;
                        (rng % 1000) as f32 / 1000.0
                    })
                    .collect();
                (i as u64, v)
            })
            .collect()
    }

    #[test]
    fn flat_finds_self() {
        let data = dataset(200, 16, 1);
        let idx = IvfIndex::train_flat(&data, DistanceMetric::L2, 8).unwrap();
        let (id, v) = &data[50];
        let results = idx.search(v, 5, 4, None).unwrap();
        assert!(results.iter().any(|c| c.id == *id));
    }

    #[test]
    fn pq_finds_approximately() {
        let data = dataset(300, 16, 2);
        let idx = IvfIndex::train_pq(&data, DistanceMetric::L2, 8, 4, 8).unwrap();
        let (id, v) = &data[10];
        let results = idx.search(v, 10, 8, None).unwrap();
        assert!(results.iter().any(|c| c.id == *id));
    }

    #[test]
    fn filter_excludes_non_matching_docs() {
        let data = dataset(50, 8, 3);
        let mut idx = IvfIndex::train_flat(&data, DistanceMetric::L2, 4).unwrap();
        for (id, _) in &data {
            let mut m = Metadata::new();
            m.insert(
                "tag".to_string(),
                crate::metadata::Value::String(if *id % 2 == 0 { "even" } else { "odd" }.to_string()),
            );
            idx.set_metadata(*id, m);
        }
        let filter = Filter::Equals("tag".to_string(), crate::metadata::Value::String("even".to_string()));
        let (_, query) = &data[0];
        let results = idx.search(query, 50, 4, Some(&filter)).unwrap();
        assert!(results.iter().all(|c| c.id % 2 == 0));
    }

    #[test]
    fn empty_training_set_is_invalid() {
        assert!(IvfIndex::train_flat(&[], DistanceMetric::L2, 4).is_err());
    }
}
