use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ChunkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub Uuid);

impl ClusterId {
    pub fn new() -> Self {
        ClusterId(Uuid::new_v4())
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

/// A soft grouping of chunks by embedding proximity. Rebuilt wholesale by an
/// external clustering pass (HDBSCAN or similar); the Cluster Store only
/// consumes precomputed clusters, it never computes membership itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub centroid: Option<Vec<f32>>,
    pub exemplar_ids: Vec<ChunkId>,
    pub membership_hash: String,
    pub created_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
}

/// One row of the many-to-many `chunk_clusters` table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub chunk_id: ChunkId,
    pub cluster_id: ClusterId,
    /// Angular distance to the cluster centroid, in `[0, 1]`.
    pub distance: f64,
}
