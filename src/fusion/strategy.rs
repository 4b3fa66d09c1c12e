//! Rank-fusion strategies combining a vector channel (ascending distance)
//! and a text channel (descending BM25 score) into one ranked list.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A fused hit, carrying both channel scores when available so callers can
/// populate `vector_score`/`text_score` on the external result object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub id: u64,
    pub score: f32,
    pub vector_score: Option<f32>,
    pub text_score: Option<f32>,
}

/// The two fusion methods the hybrid searcher supports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FusionMethod {
    /// Reciprocal Rank Fusion: `score = α/(rrf_k + rank_v) + β/(rrf_k + rank_t)`.
    Rrf { rrf_k: f32, alpha: f32, beta: f32 },
    /// Normalized weighted sum of `1 - d/d_max` and `score/score_max`.
    Weighted { alpha: f32, beta: f32 },
}

/// Fuses `vector_results` (ascending distance, id first = closest) and
/// `text_results` (descending BM25 score, id first = best) per `method`,
/// returning results sorted descending by fused score.
#[must_use]
pub fn fuse(vector_results: &[(u64, f32)], text_results: &[(u64, f32)], method: FusionMethod) -> Vec<FusionResult> {
    match method {
        FusionMethod::Rrf { rrf_k, alpha, beta } => fuse_rrf(vector_results, text_results, rrf_k, alpha, beta),
        FusionMethod::Weighted { alpha, beta } => fuse_weighted(vector_results, text_results, alpha, beta),
    }
}

fn fuse_rrf(vector_results: &[(u64, f32)], text_results: &[(u64, f32)], rrf_k: f32, alpha: f32, beta: f32) -> Vec<FusionResult> {
    let vector_ranks: FxHashMap<u64, usize> = vector_results
        .iter()
        .enumerate()
        .map(|(i, &(id, _))| (id, i + 1))
        .collect();
    let text_ranks: FxHashMap<u64, usize> = text_results
        .iter()
        .enumerate()
        .map(|(i, &(id, _))| (id, i + 1))
        .collect();
    let vector_scores: FxHashMap<u64, f32> = vector_results.iter().copied().collect();
    let text_scores: FxHashMap<u64, f32> = text_results.iter().copied().collect();

    let mut ids: Vec<u64> = vector_ranks.keys().chain(text_ranks.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut fused: Vec<FusionResult> = ids
        .into_iter()
        .map(|id| {
            let v_term = vector_ranks.get(&id).map_or(0.0, |&r| alpha / (rrf_k + r as f32));
            let t_term = text_ranks.get(&id).map_or(0.0, |&r| beta / (rrf_k + r as f32));
            FusionResult {
                id,
                score: v_term + t_term,
                vector_score: vector_scores.get(&id).copied(),
                text_score: text_scores.get(&id).copied(),
            }
        })
        .collect();
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id)));
    fused
}

fn fuse_weighted(vector_results: &[(u64, f32)], text_results: &[(u64, f32)], alpha: f32, beta: f32) -> Vec<FusionResult> {
    let d_max = vector_results.iter().map(|&(_, d)| d).fold(0.0f32, f32::max).max(f32::EPSILON);
    let s_max = text_results.iter().map(|&(_, s)| s).fold(0.0f32, f32::max).max(f32::EPSILON);

    let vector_norm: FxHashMap<u64, f32> = vector_results.iter().map(|&(id, d)| (id, 1.0 - d / d_max)).collect();
    let text_norm: FxHashMap<u64, f32> = text_results.iter().map(|&(id, s)| (id, s / s_max)).collect();
    let vector_scores: FxHashMap<u64, f32> = vector_results.iter().copied().collect();
    let text_scores: FxHashMap<u64, f32> = text_results.iter().copied().collect();

    let mut ids: Vec<u64> = vector_norm.keys().chain(text_norm.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut fused: Vec<FusionResult> = ids
        .into_iter()
        .map(|id| {
            let v = vector_norm.get(&id).copied().unwrap_or(0.0);
            let t = text_norm.get(&id).copied().unwrap_or(0.0);
            FusionResult {
                id,
                score: alpha * v + beta * t,
                vector_score: vector_scores.get(&id).copied(),
                text_score: text_scores.get(&id).copied(),
            }
        })
        .collect();
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id)));
    fused
}

#[cfg(test)]
mod strategy_tests {
    use super::*;

    #[test]
    fn rrf_fusion_ordering_matches_scenario() {
        // vector ranks: A=1, B=2, C=3; text ranks: B=1, D=2, A=3.
        let vector_results = vec![(1u64, 0.1), (2, 0.2), (3, 0.3)]; // A=1,B=2,C=3
        let text_results = vec![(2u64, 9.0), (4, 5.0), (1, 3.0)]; // B=1,D=2,A=3
        let method = FusionMethod::Rrf {
            rrf_k: 60.0,
            alpha: 0.5,
            beta: 0.5,
        };
        let fused = fuse(&vector_results, &text_results, method);
        let order: Vec<u64> = fused.iter().map(|f| f.id).collect();
        assert_eq!(order, vec![2, 1, 3, 4]); // B, A, C, D

        let b = fused.iter().find(|f| f.id == 2).unwrap();
        assert!((b.score - (0.5 / 61.0 + 0.5 / 61.0)).abs() < 1e-6);
    }

    #[test]
    fn weighted_fusion_normalizes_by_max() {
        let vector_results = vec![(1u64, 0.0), (2, 10.0)];
        let text_results = vec![(1u64, 5.0), (2, 0.0)];
        let fused = fuse(&vector_results, &text_results, FusionMethod::Weighted { alpha: 0.5, beta: 0.5 });
        let id1 = fused.iter().find(|f| f.id == 1).unwrap();
        // vector distance 0 -> norm 1.0; text score 5/5=1.0 -> fused = 0.5+0.5=1.0
        assert!((id1.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_channel_contributes_zero() {
        let vector_results = vec![(1u64, 0.1)];
        let text_results: Vec<(u64, f32)> = vec![];
        let fused = fuse(&vector_results, &text_results, FusionMethod::Rrf { rrf_k: 60.0, alpha: 0.5, beta: 0.5 });
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.5 / 61.0).abs() < 1e-6);
    }
}
