//! Adds cluster siblings of top-ranked seeds with distance-decayed scores
//! (C8).

use std::collections::HashMap;

use crate::model::{ChunkId, ClusterMembership, RankedItem, SourceTag};
use crate::store::ClusterStore;

#[derive(Debug, Clone, Copy)]
pub struct ClusterExpandConfig {
    pub max_clusters: usize,
    pub max_siblings: usize,
    pub boost_factor: f64,
}

impl Default for ClusterExpandConfig {
    fn default() -> Self {
        ClusterExpandConfig {
            max_clusters: 5,
            max_siblings: 5,
            boost_factor: 0.8,
        }
    }
}

/// Expands `seeds` (already score-sorted) with their cluster siblings.
/// Expansion is deterministic under the configured ordering; siblings
/// already present in the seed list are skipped. Merges into the existing
/// ranking by chunk id, keeping the max score and the earlier source tag.
pub fn expand_with_clusters(
    seeds: &[RankedItem],
    clusters: &ClusterStore,
    cfg: &ClusterExpandConfig,
) -> crate::error::Result<Vec<RankedItem>> {
    let present: std::collections::HashSet<ChunkId> = seeds.iter().map(|s| s.chunk_id).collect();
    let mut merged: HashMap<ChunkId, RankedItem> =
        seeds.iter().map(|s| (s.chunk_id, s.clone())).collect();
    let mut order: Vec<ChunkId> = seeds.iter().map(|s| s.chunk_id).collect();

    for seed in seeds.iter().take(cfg.max_clusters) {
        let memberships = clusters.clusters_for_chunk(seed.chunk_id)?;
        for membership in memberships {
            let siblings = clusters.members(membership.cluster_id)?;
            let mut siblings: Vec<ClusterMembership> = siblings
                .into_iter()
                .filter(|m| m.chunk_id != seed.chunk_id && !present.contains(&m.chunk_id))
                .collect();
            siblings.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for sibling in siblings.into_iter().take(cfg.max_siblings) {
                let expansion_score = seed.score * (1.0 - sibling.distance) * cfg.boost_factor;
                merged
                    .entry(sibling.chunk_id)
                    .and_modify(|existing| {
                        if expansion_score > existing.score {
                            existing.score = expansion_score;
                        }
                    })
                    .or_insert_with(|| {
                        order.push(sibling.chunk_id);
                        RankedItem {
                            chunk_id: sibling.chunk_id,
                            score: expansion_score,
                            source: SourceTag::Cluster,
                        }
                    });
            }
        }
    }

    Ok(order.into_iter().map(|id| merged[&id].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, Cluster, ClusterId};
    use crate::store::{ChunkStore, Db};
    use chrono::Utc;

    fn make_chunk(project: &str) -> Chunk {
        Chunk {
            id: ChunkId::new(),
            session_id: "s1".into(),
            project_slug: project.into(),
            project_path: None,
            turn_indices: vec![1],
            start_time: Utc::now(),
            end_time: Utc::now(),
            content: "hello world".into(),
            approx_tokens: 2,
            agent_id: None,
            vector_clock: {
                let mut c = crate::clock::VectorClock::new();
                c.set("a", 1);
                c
            },
            spawn_depth: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn siblings_already_in_seed_list_are_skipped() {
        let db = Db::open_in_memory().unwrap();
        let chunk_store = ChunkStore::new(db.clone());
        let cluster_store = ClusterStore::new(db);

        let c1 = make_chunk("p");
        let c2 = make_chunk("p");
        chunk_store.upsert(&c1).unwrap();
        chunk_store.upsert(&c2).unwrap();

        let cluster_id = ClusterId::new();
        let cluster = Cluster {
            id: cluster_id,
            name: None,
            description: None,
            centroid: None,
            exemplar_ids: vec![],
            membership_hash: "h".into(),
            created_at: Utc::now(),
            refreshed_at: Utc::now(),
        };
        cluster_store
            .replace_all(
                &[cluster],
                &[
                    ClusterMembership {
                        chunk_id: c1.id,
                        cluster_id,
                        distance: 0.0,
                    },
                    ClusterMembership {
                        chunk_id: c2.id,
                        cluster_id,
                        distance: 0.1,
                    },
                ],
            )
            .unwrap();

        let seeds = vec![
            RankedItem {
                chunk_id: c1.id,
                score: 1.0,
                source: SourceTag::Vector,
            },
            RankedItem {
                chunk_id: c2.id,
                score: 0.9,
                source: SourceTag::Vector,
            },
        ];
        let expanded =
            expand_with_clusters(&seeds, &cluster_store, &ClusterExpandConfig::default()).unwrap();
        assert_eq!(expanded.len(), 2);
    }
}
