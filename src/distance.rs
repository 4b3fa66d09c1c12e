//! Distance metrics for vector similarity.
//!
//! All four kernels are oriented so that "smaller is closer" holds
//! uniformly, which keeps every heap and comparison in the rest of the
//! crate free of metric-specific sign flips.

use serde::{Deserialize, Serialize};

/// Distance metric used by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// `1 - cosine_similarity(a, b)`. 0 for identical direction, 1 for
    /// orthogonal, 2 for opposite. Zero-norm input yields 1.
    Cosine,
    /// Euclidean (L2) distance.
    L2,
    /// Squared Euclidean distance (cheaper, same ordering as L2).
    SquaredL2,
    /// Negative dot product, so that larger inner product means smaller
    /// (closer) distance.
    NegativeDot,
}

impl DistanceMetric {
    /// Computes the distance between two equal-length vectors.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DimensionMismatch`] if `a.len() != b.len()`.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> crate::Result<f32> {
        if a.len() != b.len() {
            return Err(crate::Error::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => l2_distance(a, b),
            Self::SquaredL2 => squared_l2_distance(a, b),
            Self::NegativeDot => negative_dot(a, b),
        })
    }

    /// Computes the distance without validating lengths.
    ///
    /// Callers in hot search paths that have already validated dimensions
    /// against the index's fixed `dim` use this to skip the branch.
    #[must_use]
    pub fn distance_unchecked(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => l2_distance(a, b),
            Self::SquaredL2 => squared_l2_distance(a, b),
            Self::NegativeDot => negative_dot(a, b),
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let cosine_similarity = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    1.0 - cosine_similarity
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_l2_distance(a, b).sqrt()
}

fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn negative_dot(a: &[f32], b: &[f32]) -> f32 {
    -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>()
}
