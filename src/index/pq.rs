//! Product quantization: per-subvector k-means codebooks, encoding, and
//! asymmetric distance tables.

use rustc_hash::FxHashSet;

use crate::{Error, Result};

const MAX_KMEANS_ITERATIONS: usize = 25;

/// A trained product quantizer: `m` subspaces, each with `2^bits` centroids
/// of length `dim / m`.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dim: usize,
    m: usize,
    bits: u32,
    sub_dim: usize,
    /// `codebooks[j][c]` is the length-`sub_dim` centroid `c` of subspace `j`.
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl ProductQuantizer {
    /// Trains a quantizer on `samples` (each of length `dim`).
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `samples` is empty, `dim % m != 0`, or `bits` is 0
    /// or greater than 8 (codes are packed one byte each).
    pub fn train(samples: &[Vec<f32>], m: usize, bits: u32, seed: u64) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Err(Error::InvalidInput("PQ training set must not be empty".to_string()));
        };
        let dim = first.len();
        if dim == 0 || m == 0 || dim % m != 0 {
            return Err(Error::InvalidInput(format!(
                "PQ dim {dim} must be a positive multiple of m={m}"
            )));
        }
        if bits == 0 || bits > 8 {
            return Err(Error::InvalidInput(format!("PQ bits {bits} must be in 1..=8")));
        }
        let sub_dim = dim / m;
        let k = 1usize << bits;

        let mut codebooks = Vec::with_capacity(m);
        for j in 0..m {
            let subvectors: Vec<Vec<f32>> = samples
                .iter()
                .map(|v| v[j * sub_dim..(j + 1) * sub_dim].to_vec())
                .collect();
            codebooks.push(kmeans(&subvectors, k, seed.wrapping_add(j as u64)));
        }

        Ok(Self {
            dim,
            m,
            bits,
            sub_dim,
            codebooks,
        })
    }

    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub const fn m(&self) -> usize {
        self.m
    }

    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Encodes `vector` into `m` centroid-index bytes.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `vector.len() != dim`.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let mut code = Vec::with_capacity(self.m);
        for j in 0..self.m {
            let sub = &vector[j * self.sub_dim..(j + 1) * self.sub_dim];
            code.push(nearest_centroid(sub, &self.codebooks[j]) as u8);
        }
        Ok(code)
    }

    /// Precomputes, for each subspace, the squared-L2 distance from `query`'s
    /// subvector to every centroid in that subspace.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `query.len() != dim`.
    pub fn distance_table(&self, query: &[f32]) -> Result<Vec<Vec<f32>>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut table = Vec::with_capacity(self.m);
        for j in 0..self.m {
            let sub = &query[j * self.sub_dim..(j + 1) * self.sub_dim];
            let row = self.codebooks[j]
                .iter()
                .map(|centroid| squared_l2(sub, centroid))
                .collect();
            table.push(row);
        }
        Ok(table)
    }

    /// `Σ_j table[j][code[j]]`, the asymmetric distance between the query
    /// that produced `table` and the vector that produced `code`.
    #[must_use]
    pub fn asymmetric_distance(table: &[Vec<f32>], code: &[u8]) -> f32 {
        table
            .iter()
            .zip(code)
            .map(|(row, &c)| row[c as usize])
            .sum()
    }

    /// Reconstructs an approximate vector from `code` by concatenating the
    /// selected centroids.
    #[must_use]
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        code.iter()
            .enumerate()
            .flat_map(|(j, &c)| self.codebooks[j][c as usize].clone())
            .collect()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            squared_l2(v, a)
                .partial_cmp(&squared_l2(v, b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map_or(0, |(idx, _)| idx)
}

/// k-means with k-means++ seeding and a capped iteration budget, per the
/// scale note that training runs on a sample rather than the full set.
fn kmeans(points: &[Vec<f32>], k: usize, seed: u64) -> Vec<Vec<f32>> {
    let dim = points[0].len();
    let k = k.min(points.len()).max(1);
    let mut rng = seed;
    let mut next = move || {
        rng ^= rng << 13;
        rng ^= rng >> 7;
        rng ^= rng << 17;
        rng
    };

    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[(next() as usize) % points.len()].clone());
    let mut chosen: FxHashSet<usize> = FxHashSet::default();
    while centroids.len() < k {
        let distances: Vec<f32> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| squared_l2(p, c))
                    .fold(f32::MAX, f32::min)
            })
            .collect();
        let total: f32 = distances.iter().sum();
        let pick = if total <= 0.0 {
            (next() as usize) % points.len()
        } else {
            let target = (next() as f64 / u64::MAX as f64) as f32 * total;
            let mut acc = 0.0;
            let mut idx = 0;
            for (i, d) in distances.iter().enumerate() {
                acc += d;
                if acc >= target {
                    idx = i;
                    break;
                }
            }
            idx
        };
        if chosen.insert(pick) {
            centroids.push(points[pick].clone());
        } else if centroids.len() < points.len() {
            // Collision on a degenerate dataset: fall back to the next
            // unchosen point to avoid spinning forever.
            if let Some(fallback) = (0..points.len()).find(|i| !chosen.contains(i)) {
                chosen.insert(fallback);
                centroids.push(points[fallback].clone());
            } else {
                break;
            }
        } else {
            break;
        }
    }

    let mut assignment = vec![0usize; points.len()];
    for _ in 0..MAX_KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let nearest = nearest_centroid(p, &centroids);
            if nearest != assignment[i] {
                assignment[i] = nearest;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
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
mod pq_tests {
    use super::*;

    fn sample_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
        let mut rng = 0x1234_5678_u64;
        (0..n)
            .map(|_| {
                (0..dim)
                    .map(|_| {
                        rng ^= rng << 13;
                        rng ^= rng >> 7;
                        rng ^= rng << 17;
                        (rng % 1000) as f32 / 1000.0
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn rejects_empty_training_set() {
        assert!(ProductQuantizer::train(&[], 2, 8, 1).is_err());
    }

    #[test]
    fn rejects_dim_not_divisible_by_m() {
        let samples = sample_vectors(10, 7);
        assert!(ProductQuantizer::train(&samples, 3, 8, 1).is_err());
    }

    #[test]
    fn every_code_byte_is_within_bit_budget() {
        let samples = sample_vectors(200, 16);
        let pq = ProductQuantizer::train(&samples, 4, 4, 7).unwrap();
        for v in &samples {
            let code = pq.encode(v).unwrap();
            for &c in &code {
                assert!((c as u32) < (1 << 4));
            }
        }
    }

    #[test]
    fn asymmetric_distance_matches_direct_computation_roughly() {
        let samples = sample_vectors(100, 8);
        let pq = ProductQuantizer::train(&samples, 2, 8, 3).unwrap();
        let query = &samples[0];
        let code = pq.encode(&samples[1]).unwrap();
        let table = pq.distance_table(query).unwrap();
        let via_table = ProductQuantizer::asymmetric_distance(&table, &code);
        let reconstructed = pq.decode(&code);
        let direct = squared_l2(query, &reconstructed);
        assert!((via_table - direct).abs() < 1e-3);
    }

    #[test]
    fn encode_rejects_dimension_mismatch() {
        let samples = sample_vectors(10, 8);
        let pq = ProductQuantizer::train(&samples, 2, 8, 1).unwrap();
        assert!(pq.encode(&[1.0, 2.0]).is_err());
    }
}
