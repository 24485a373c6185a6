//! Tunables the component specs otherwise leave as hardcoded defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rrf_k: f64,
    pub vector_search_limit: usize,
    pub mmr_lambda: f64,
    pub mmr_threshold: usize,
    pub cluster_max_clusters: usize,
    pub cluster_max_siblings: usize,
    pub cluster_boost_factor: f64,
    pub min_weight: f64,
    pub store_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            rrf_k: crate::fuse::DEFAULT_RRF_K,
            vector_search_limit: 20,
            mmr_lambda: 0.7,
            mmr_threshold: 10,
            cluster_max_clusters: 5,
            cluster_max_siblings: 5,
            cluster_boost_factor: 0.8,
            min_weight: crate::clock::MIN_WEIGHT_DEFAULT,
            store_retry_attempts: 3,
        }
    }
}
