//! Hybrid search: runs the vector and text channels and combines them by
//! rank fusion, with channel-failure fallback.

mod strategy;

pub use strategy::{fuse, FusionMethod, FusionResult};

use tracing::warn;

use crate::{Error, Result};

/// Runs the vector and text channels and fuses their results.
///
/// `vector_search` and `text_search` each receive `2k` as their candidate
/// budget, per the hybrid searcher's contract. If the vector channel
/// fails, the search falls back to text-only; if the text channel yields
/// no results (empty, not an error), vector-only is returned unfused.
pub fn hybrid_search<VF, TF>(
    vector_search: VF,
    text_search: TF,
    k: usize,
    method: FusionMethod,
) -> Result<Vec<FusionResult>>
where
    VF: FnOnce(usize) -> Result<Vec<(u64, f32)>>,
    TF: FnOnce(usize) -> Result<Vec<(u64, f32)>>,
{
    let budget = 2 * k.max(1);
    let vector_results = match vector_search(budget) {
        Ok(r) => Some(r),
        Err(err) => {
            warn!(error = %err, "hybrid search: vector channel failed, falling back to text-only");
            None
        }
    };

    let Some(vector_results) = vector_results else {
        let text_results = text_search(budget)?;
        let mut fused: Vec<FusionResult> = text_results
            .into_iter()
            .map(|(id, score)| FusionResult {
                id,
                score,
                vector_score: None,
                text_score: Some(score),
            })
            .collect();
        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(k);
        return Ok(fused);
    };

    let text_results = text_search(budget).unwrap_or_default();
    if text_results.is_empty() {
        let d_max = vector_results.iter().map(|&(_, d)| d).fold(0.0f32, f32::max).max(f32::EPSILON);
        let mut fused: Vec<FusionResult> = vector_results
            .into_iter()
            .map(|(id, distance)| FusionResult {
                id,
                score: 1.0 - distance / d_max,
                vector_score: Some(distance),
                text_score: None,
            })
            .collect();
        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(k);
        return Ok(fused);
    }

    let mut fused = fuse(&vector_results, &text_results, method);
    fused.truncate(k);
    Ok(fused)
}
