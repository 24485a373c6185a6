use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ChunkId;
use crate::clock::VectorClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        EdgeId(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Backward,
    Forward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceType {
    WithinChain,
    FilePath,
    CodeEntity,
    ExplicitBackref,
    ErrorFragment,
    ToolOutput,
    CrossSession,
    Adjacent,
    /// Catch-all for reference flavors the corpus doesn't enumerate.
    Other(String),
}

/// A directed typed reference between chunks.
///
/// `(source_id, target_id, reference_type)` tuples collapse into one edge
/// whose `link_count` accumulates on upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: ChunkId,
    pub target_id: ChunkId,
    pub edge_type: EdgeType,
    pub reference_type: ReferenceType,
    pub initial_weight: f64,
    pub link_count: u32,
    pub created_at: DateTime<Utc>,
    pub vector_clock: VectorClock,
}

impl Edge {
    pub fn validate(&self) -> Result<(), String> {
        if self.source_id == self.target_id {
            return Err("source_id must differ from target_id".into());
        }
        if !(0.0..=1.0).contains(&self.initial_weight) || self.initial_weight <= 0.0 {
            return Err("initial_weight must be in (0, 1]".into());
        }
        if self.link_count < 1 {
            return Err("link_count must be >= 1".into());
        }
        Ok(())
    }
}
