//! Core data types: Chunk, Edge, Cluster, and the source-tagged item shape
//! shared by every ranked list in the engine.

mod chunk;
mod cluster;
mod edge;

pub use chunk::{Chunk, ChunkId, SessionSummary};
pub use cluster::{Cluster, ClusterId, ClusterMembership};
pub use edge::{Edge, EdgeId, EdgeType, ReferenceType};

use serde::{Deserialize, Serialize};

/// Where a ranked item came from, carried through fusion, expansion, and
/// reranking so the final response can report provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Vector,
    Keyword,
    Cluster,
    Graph,
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceTag::Vector => "vector",
            SourceTag::Keyword => "keyword",
            SourceTag::Cluster => "cluster",
            SourceTag::Graph => "graph",
        };
        write!(f, "{s}")
    }
}

/// One ranked item flowing through RRF fusion, cluster expansion, and MMR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub chunk_id: ChunkId,
    pub score: f64,
    pub source: SourceTag,
}
