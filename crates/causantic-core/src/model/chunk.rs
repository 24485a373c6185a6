use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::VectorClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub Uuid);

impl ChunkId {
    pub fn new() -> Self {
        ChunkId(Uuid::new_v4())
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous span of one session's transcript.
///
/// Invariants: `turn_indices` non-empty and sorted; `start_time <= end_time`;
/// `vector_clock` keys non-empty; `approx_tokens > 0` when `content` is
/// non-empty. Chunks are immutable after ingestion except for deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub session_id: String,
    pub project_slug: String,
    pub project_path: Option<String>,
    pub turn_indices: Vec<u32>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub content: String,
    pub approx_tokens: u32,
    pub agent_id: Option<String>,
    pub vector_clock: VectorClock,
    pub spawn_depth: u32,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn validate(&self) -> Result<(), String> {
        if self.turn_indices.is_empty() {
            return Err("turn_indices must be non-empty".into());
        }
        if !self.turn_indices.windows(2).all(|w| w[0] <= w[1]) {
            return Err("turn_indices must be sorted".into());
        }
        if self.start_time > self.end_time {
            return Err("start_time must be <= end_time".into());
        }
        if self.vector_clock.is_empty() {
            return Err("vector_clock must have at least one agent key".into());
        }
        if !self.content.is_empty() && self.approx_tokens == 0 {
            return Err("approx_tokens must be > 0 when content is non-empty".into());
        }
        Ok(())
    }
}

/// A lightweight session-level rollup returned by `list_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub project_slug: String,
    pub chunk_count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_tokens: u64,
}
