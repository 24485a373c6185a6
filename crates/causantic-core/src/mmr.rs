//! Maximal Marginal Relevance diversity reranking (C10).

use crate::model::RankedItem;
use crate::similarity::{angular_distance, cosine_similarity};

#[derive(Debug, Clone, Copy)]
pub struct MmrConfig {
    pub lambda: f64,
    /// Below this many candidates, MMR is skipped and input order is kept.
    pub threshold: usize,
}

impl Default for MmrConfig {
    fn default() -> Self {
        MmrConfig {
            lambda: 0.7,
            threshold: 10,
        }
    }
}

/// Reranks `candidates` for diversity. Below `cfg.threshold` candidates,
/// returns the input unchanged. Otherwise iteratively selects the
/// candidate maximizing `lambda * relevance + (1 - lambda) * novelty`
/// until every candidate has been placed. Scores and source tags are
/// preserved; only order changes. Ties broken by input order.
pub fn mmr_rerank(
    candidates: &[RankedItem],
    query_embedding: Option<&[f32]>,
    embedding_lookup: &dyn Fn(crate::model::ChunkId) -> Option<Vec<f32>>,
    cfg: &MmrConfig,
) -> Vec<RankedItem> {
    if candidates.len() < cfg.threshold {
        return candidates.to_vec();
    }

    let embeddings: Vec<Option<Vec<f32>>> = candidates
        .iter()
        .map(|c| embedding_lookup(c.chunk_id))
        .collect();

    let max_score = candidates.iter().map(|c| c.score).fold(f64::MIN, f64::max);
    let min_score = candidates.iter().map(|c| c.score).fold(f64::MAX, f64::min);
    let normalized_score = |score: f64| -> f64 {
        if (max_score - min_score).abs() < f64::EPSILON {
            1.0
        } else {
            (score - min_score) / (max_score - min_score)
        }
    };

    let relevance = |i: usize| -> f64 {
        match (query_embedding, &embeddings[i]) {
            (Some(q), Some(emb)) => 1.0 - angular_distance(emb, q),
            _ => normalized_score(candidates[i].score),
        }
    };

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(candidates.len());

    while !remaining.is_empty() {
        let mut best_idx = 0usize;
        let mut best_mmr = f64::MIN;
        for (pos, &idx) in remaining.iter().enumerate() {
            let novelty = match &embeddings[idx] {
                None => 1.0,
                Some(emb) => {
                    let max_sim = selected
                        .iter()
                        .filter_map(|&s| embeddings[s].as_ref())
                        .map(|other| cosine_similarity(emb, other))
                        .fold(f64::MIN, f64::max);
                    if selected.is_empty() {
                        1.0
                    } else {
                        1.0 - max_sim.max(0.0)
                    }
                }
            };
            let mmr_score = cfg.lambda * relevance(idx) + (1.0 - cfg.lambda) * novelty;
            if mmr_score > best_mmr {
                best_mmr = mmr_score;
                best_idx = pos;
            }
        }
        selected.push(remaining.remove(best_idx));
    }

    selected.into_iter().map(|i| candidates[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkId, SourceTag};

    fn item(score: f64) -> RankedItem {
        RankedItem {
            chunk_id: ChunkId::new(),
            score,
            source: SourceTag::Vector,
        }
    }

    #[test]
    fn below_threshold_returns_input_unchanged() {
        let candidates: Vec<RankedItem> = (0..5).map(|i| item(i as f64)).collect();
        let out = mmr_rerank(&candidates, None, &|_| None, &MmrConfig::default());
        assert_eq!(out, candidates);
    }

    #[test]
    fn all_candidates_present_exactly_once() {
        let candidates: Vec<RankedItem> = (0..12).map(|i| item(i as f64)).collect();
        let out = mmr_rerank(&candidates, None, &|_| None, &MmrConfig::default());
        assert_eq!(out.len(), candidates.len());
        for c in &candidates {
            assert_eq!(out.iter().filter(|o| o.chunk_id == c.chunk_id).count(), 1);
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let candidates: Vec<RankedItem> = (0..12).map(|i| item(i as f64)).collect();
        let out1 = mmr_rerank(&candidates, None, &|_| None, &MmrConfig::default());
        let out2 = mmr_rerank(&candidates, None, &|_| None, &MmrConfig::default());
        assert_eq!(
            out1.iter().map(|i| i.chunk_id).collect::<Vec<_>>(),
            out2.iter().map(|i| i.chunk_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn diversifies_near_duplicate_cluster() {
        use std::collections::HashMap;
        let mut embeddings = HashMap::new();
        let mut candidates = Vec::new();
        // 6 near-duplicates pointing the same direction.
        for i in 0..6 {
            let id = ChunkId::new();
            embeddings.insert(id, vec![1.0, 0.01 * i as f32]);
            candidates.push(RankedItem {
                chunk_id: id,
                score: 1.0 - 0.01 * i as f64,
                source: SourceTag::Vector,
            });
        }
        // 6 diverse candidates spread across the embedding space.
        for i in 0..6 {
            let id = ChunkId::new();
            let angle = (i as f32 + 1.0) * 0.3;
            embeddings.insert(id, vec![angle.cos(), angle.sin()]);
            candidates.push(RankedItem {
                chunk_id: id,
                score: 0.5 - 0.01 * i as f64,
                source: SourceTag::Vector,
            });
        }
        let query = vec![1.0, 0.0];
        let lookup = |id: ChunkId| embeddings.get(&id).cloned();
        let cfg = MmrConfig {
            lambda: 0.7,
            threshold: 10,
        };
        let out = mmr_rerank(&candidates, Some(&query), &lookup, &cfg);
        let diverse_ids: std::collections::HashSet<_> =
            candidates[6..].iter().map(|c| c.chunk_id).collect();
        let has_diverse_in_top8 = out.iter().take(8).any(|c| diverse_ids.contains(&c.chunk_id));
        assert!(has_diverse_in_top8);
    }
}
