//! Reciprocal Rank Fusion across heterogeneous ranked lists (C7).

use std::collections::HashMap;

use crate::model::{ChunkId, RankedItem, SourceTag};

pub const DEFAULT_RRF_K: f64 = 60.0;

/// One input ranked list plus its fusion weight.
pub struct RankedSource {
    pub items: Vec<(ChunkId, SourceTag)>,
    pub weight: f64,
}

/// Fuses `sources` into one ranked list. Each item at 0-based rank `r` in a
/// source of weight `w` contributes `w / (k + r + 1)` to its chunk's fused
/// score. When the same chunk appears in multiple sources, its source tag
/// is the one whose single contribution was largest; ties keep the first
/// source listed. Output is sorted by fused score descending, ties broken
/// by first-appearance order.
pub fn rrf_fuse(sources: &[RankedSource], k: f64) -> Vec<RankedItem> {
    let mut fused_score: HashMap<ChunkId, f64> = HashMap::new();
    let mut best_tag: HashMap<ChunkId, (f64, usize, SourceTag)> = HashMap::new();
    let mut first_seen: HashMap<ChunkId, usize> = HashMap::new();
    let mut order_counter = 0usize;

    for (source_idx, source) in sources.iter().enumerate() {
        for (rank, (id, tag)) in source.items.iter().enumerate() {
            let contribution = source.weight / (k + rank as f64 + 1.0);
            *fused_score.entry(*id).or_insert(0.0) += contribution;

            first_seen.entry(*id).or_insert_with(|| {
                let v = order_counter;
                order_counter += 1;
                v
            });

            let candidate = (contribution, source_idx, *tag);
            best_tag
                .entry(*id)
                .and_modify(|current| {
                    // Larger contribution wins; on an exact tie keep the
                    // earlier-listed source (smaller source_idx).
                    if candidate.0 > current.0
                        || (candidate.0 == current.0 && candidate.1 < current.1)
                    {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }

    let mut items: Vec<RankedItem> = fused_score
        .into_iter()
        .map(|(id, score)| RankedItem {
            chunk_id: id,
            score,
            source: best_tag[&id].2,
        })
        .collect();

    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| first_seen[&a.chunk_id].cmp(&first_seen[&b.chunk_id]))
    });

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn single_source_score_matches_formula() {
        let a = ChunkId::new();
        let b = ChunkId::new();
        let sources = vec![RankedSource {
            items: vec![(a, SourceTag::Vector), (b, SourceTag::Vector)],
            weight: 1.0,
        }];
        let fused = rrf_fuse(&sources, 60.0);
        approx(fused[0].score, 1.0 / 61.0);
        approx(fused[1].score, 1.0 / 62.0);
    }

    #[test]
    fn disjoint_sources_union_all_items() {
        let a = ChunkId::new();
        let b = ChunkId::new();
        let sources = vec![
            RankedSource {
                items: vec![(a, SourceTag::Vector)],
                weight: 1.0,
            },
            RankedSource {
                items: vec![(b, SourceTag::Keyword)],
                weight: 1.0,
            },
        ];
        let fused = rrf_fuse(&sources, 60.0);
        let ids: Vec<_> = fused.iter().map(|i| i.chunk_id).collect();
        assert!(ids.contains(&a));
        assert!(ids.contains(&b));
    }

    #[test]
    fn overlapping_item_gets_summed_score_and_largest_contribution_tag() {
        let a = ChunkId::new();
        let sources = vec![
            RankedSource {
                items: vec![(a, SourceTag::Vector)],
                weight: 1.0,
            },
            RankedSource {
                items: vec![(a, SourceTag::Keyword)],
                weight: 1.5,
            },
        ];
        let fused = rrf_fuse(&sources, 60.0);
        approx(fused[0].score, 1.0 / 61.0 + 1.5 / 61.0);
        assert_eq!(fused[0].source, SourceTag::Keyword);
    }

    #[test]
    fn identical_sources_produce_same_ranking_up_to_ties() {
        let a = ChunkId::new();
        let b = ChunkId::new();
        let sources = vec![RankedSource {
            items: vec![(a, SourceTag::Vector), (b, SourceTag::Vector)],
            weight: 1.0,
        }];
        let fused1 = rrf_fuse(&sources, 60.0);
        let fused2 = rrf_fuse(&sources, 60.0);
        assert_eq!(
            fused1.iter().map(|i| i.chunk_id).collect::<Vec<_>>(),
            fused2.iter().map(|i| i.chunk_id).collect::<Vec<_>>()
        );
    }
}
