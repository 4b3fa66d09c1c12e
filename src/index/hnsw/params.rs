//! Tuning parameters for an [`super::HnswIndex`], plus the search-quality
//! presets layered on top of the raw `ef_search` knob.

use serde::{Deserialize, Serialize};

/// Construction- and layer-geometry parameters for an HNSW graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Maximum degree at layers above 0.
    pub m: usize,
    /// Maximum degree at layer 0. Conventionally `2 * m`.
    pub m0: usize,
    /// Candidate list size used during insertion's `searchLayer` calls.
    pub ef_construction: usize,
    /// Level-assignment decay: `ml = 1 / ln(m)`.
    pub ml: f64,
}

impl HnswParams {
    /// Builds params with the conventional `m0 = 2m` and `ml = 1/ln(m)`.
    ///
    /// # Panics
    ///
    /// Panics if `m < 2`, since `ln(m) <= 0` would make level assignment
    /// degenerate.
    #[must_use]
    pub fn new(m: usize, ef_construction: usize) -> Self {
        assert!(m >= 2, "HNSW M must be at least 2");
        Self {
            m,
            m0: 2 * m,
            ef_construction,
            ml: 1.0 / (m as f64).ln(),
        }
    }

    /// Balanced default: `M=16, ef_construction=200`, matching the
    /// parameters used by the recall@10 quality property.
    #[must_use]
    pub fn balanced() -> Self {
        Self::new(16, 200)
    }

    /// Lower recall, faster build/insert: `M=8, ef_construction=64`.
    #[must_use]
    pub fn fast() -> Self {
        Self::new(8, 64)
    }

    /// Higher recall, slower build/insert: `M=32, ef_construction=400`.
    #[must_use]
    pub fn accurate() -> Self {
        Self::new(32, 400)
    }

    /// Max degree allowed at `layer`.
    #[must_use]
    pub fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m0
        } else {
            self.m
        }
    }
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Convenience presets mapping onto `ef_search` as a multiple of `k`. These
/// sit alongside the raw `ef_search` parameter every search call still
/// accepts directly; they never replace it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchQuality {
    Fast,
    Balanced,
    Accurate,
    HighRecall,
}

impl SearchQuality {
    /// Derives an `ef_search` value for a given `k` under this preset.
    #[must_use]
    pub fn ef_search(&self, k: usize) -> usize {
        let multiple = match self {
            Self::Fast => 2,
            Self::Balanced => 4,
            Self::Accurate => 8,
            Self::HighRecall => 16,
        };
        (k * multiple).max(k)
    }
}
