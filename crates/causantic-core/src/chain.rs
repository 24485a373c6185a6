//! Causal walk forward/backward from seed chunks under a shared token
//! budget and a shared visited set (C9).
//!
//! Per the design note on cyclic graphs: walking follows chunk ids through
//! store lookups rather than holding object references, and a `visited`
//! hash set stands in for the "bitset over an integer slot index" the
//! design note suggests — chunk ids are already the natural index here, so
//! no separate slot table is needed.

use std::collections::HashSet;

use crate::clock::{DecayCurve, VectorClock};
use crate::error::Result;
use crate::model::{ChunkId, Edge, EdgeType};
use crate::similarity::angular_distance;
use crate::store::{ChunkStore, EdgeStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone)]
pub struct ChainWalkConfig {
    pub direction: Direction,
    pub token_budget: u32,
    pub max_depth: Option<u32>,
    pub min_weight: f64,
}

#[derive(Debug, Clone)]
pub struct Chain {
    pub seed_id: ChunkId,
    pub chunk_ids: Vec<ChunkId>,
    pub node_scores: Vec<f64>,
    pub aggregate_score: f64,
    pub total_tokens: u32,
    pub median_score: f64,
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Walks from each seed, in order, mutating one shared `visited` set so
/// chains produced by one call never overlap.
pub fn walk_chains(
    seeds: &[ChunkId],
    config: &ChainWalkConfig,
    reference_clock: &VectorClock,
    decay: &DecayCurve,
    query_embedding: Option<&[f32]>,
    chunk_store: &ChunkStore,
    edge_store: &EdgeStore,
    vector_lookup: &dyn Fn(ChunkId) -> Option<Vec<f32>>,
) -> Result<Vec<Chain>> {
    let mut visited: HashSet<ChunkId> = seeds.iter().copied().collect();
    let mut remaining_budget = config.token_budget;
    let mut chains = Vec::new();

    for &seed in seeds {
        let Some(seed_chunk) = chunk_store.get(seed)? else {
            // A seed not in the store yields an empty chain.
            chains.push(Chain {
                seed_id: seed,
                chunk_ids: vec![],
                node_scores: vec![],
                aggregate_score: 0.0,
                total_tokens: 0,
                median_score: 0.0,
            });
            continue;
        };

        if remaining_budget == 0 {
            chains.push(Chain {
                seed_id: seed,
                chunk_ids: vec![],
                node_scores: vec![],
                aggregate_score: 0.0,
                total_tokens: 0,
                median_score: 0.0,
            });
            continue;
        }

        let mut chunk_ids = vec![seed];
        let mut total_tokens = seed_chunk.approx_tokens;
        remaining_budget = remaining_budget.saturating_sub(total_tokens);

        let mut current = seed;
        let mut depth = 0u32;
        loop {
            if let Some(max_depth) = config.max_depth {
                if depth >= max_depth {
                    break;
                }
            }
            if remaining_budget == 0 {
                break;
            }
            let edges = match config.direction {
                Direction::Forward => edge_store.forward(current)?,
                Direction::Backward => edge_store.backward(current)?,
            };
            let best = best_successor(&edges, config.direction, &visited, reference_clock, decay, config.min_weight);
            let Some(next) = best else { break };
            let Some(next_chunk) = chunk_store.get(next)? else {
                break;
            };
            if next_chunk.approx_tokens > remaining_budget {
                break;
            }
            visited.insert(next);
            chunk_ids.push(next);
            total_tokens += next_chunk.approx_tokens;
            remaining_budget = remaining_budget.saturating_sub(next_chunk.approx_tokens);
            current = next;
            depth += 1;
        }

        let node_scores: Vec<f64> = chunk_ids
            .iter()
            .map(|id| match (query_embedding, vector_lookup(*id)) {
                (Some(q), Some(emb)) => 1.0 - angular_distance(&emb, q),
                _ => 0.0,
            })
            .collect();
        let aggregate_score = node_scores.iter().sum();
        let median_score = median(&node_scores);

        chains.push(Chain {
            seed_id: seed,
            chunk_ids,
            node_scores,
            aggregate_score,
            total_tokens,
            median_score,
        });
    }

    Ok(chains)
}

fn best_successor(
    edges: &[Edge],
    direction: Direction,
    visited: &HashSet<ChunkId>,
    reference_clock: &VectorClock,
    decay: &DecayCurve,
    min_weight: f64,
) -> Option<ChunkId> {
    edges
        .iter()
        .filter(|e| e.edge_type == edge_type_for(direction))
        .filter_map(|e| {
            let target = match direction {
                Direction::Forward => e.target_id,
                Direction::Backward => e.source_id,
            };
            if visited.contains(&target) {
                return None;
            }
            let hops = reference_clock.hop_count(&e.vector_clock) as f64;
            let weight = e.initial_weight * decay.weight(hops);
            if weight < min_weight {
                return None;
            }
            Some((target, weight))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(id, _)| id)
}

fn edge_type_for(direction: Direction) -> EdgeType {
    match direction {
        Direction::Forward => EdgeType::Forward,
        Direction::Backward => EdgeType::Backward,
    }
}

/// Picks the chain with the highest median score among those of length
/// >= 2 nodes; returns `None` if none qualifies. Median, not mean, so a
/// single weak link doesn't disqualify an otherwise strong chain.
pub fn select_best_chain(chains: &[Chain]) -> Option<&Chain> {
    chains
        .iter()
        .filter(|c| c.chunk_ids.len() >= 2)
        .max_by(|a, b| a.median_score.partial_cmp(&b.median_score).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_and_odd_sets() {
        assert!((median(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
        assert!((median(&[1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < 1e-12);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn select_best_chain_skips_singletons() {
        let short = Chain {
            seed_id: ChunkId::new(),
            chunk_ids: vec![ChunkId::new()],
            node_scores: vec![0.9],
            aggregate_score: 0.9,
            total_tokens: 10,
            median_score: 0.9,
        };
        let long = Chain {
            seed_id: ChunkId::new(),
            chunk_ids: vec![ChunkId::new(), ChunkId::new()],
            node_scores: vec![0.5, 0.6],
            aggregate_score: 1.1,
            total_tokens: 20,
            median_score: 0.55,
        };
        let best = select_best_chain(&[short, long.clone()]).unwrap();
        assert_eq!(best.chunk_ids.len(), long.chunk_ids.len());
    }

    #[test]
    fn select_best_chain_none_when_all_singletons() {
        let singleton = Chain {
            seed_id: ChunkId::new(),
            chunk_ids: vec![ChunkId::new()],
            node_scores: vec![0.9],
            aggregate_score: 0.9,
            total_tokens: 10,
            median_score: 0.9,
        };
        assert!(select_best_chain(&[singleton]).is_none());
    }
}
