//! Time-window / previous-session chronological replay under a token
//! budget (C12).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::Chunk;
use crate::store::ChunkStore;

#[derive(Debug, Clone)]
pub enum WindowSpec {
    SessionId(String),
    Range { from: DateTime<Utc>, to: DateTime<Utc> },
    DaysBack(i64),
    PreviousSession { current_session_id: String },
}

#[derive(Debug, Clone)]
pub struct ReconstructOpts {
    pub window: WindowSpec,
    pub project: String,
    pub max_tokens: u32,
    pub keep_newest: bool,
}

impl Default for ReconstructOpts {
    fn default() -> Self {
        ReconstructOpts {
            window: WindowSpec::DaysBack(1),
            project: String::new(),
            max_tokens: 50_000,
            keep_newest: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructResult {
    pub chunks: Vec<Chunk>,
    pub sessions: Vec<String>,
    pub total_tokens: u64,
    pub truncated: bool,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

pub fn reconstruct(chunk_store: &ChunkStore, opts: &ReconstructOpts) -> Result<ReconstructResult> {
    let (from, to, session_filter) = resolve_window(chunk_store, opts)?;

    let Some((from, to)) = from.zip(to) else {
        return Ok(ReconstructResult {
            chunks: vec![],
            sessions: vec![],
            total_tokens: 0,
            truncated: false,
            time_range: None,
        });
    };

    let mut chunks = chunk_store.in_time_range(&opts.project, from, to)?;
    if let Some(session_id) = &session_filter {
        chunks.retain(|c| &c.session_id == session_id);
    }
    chunks.sort_by_key(|c| c.start_time);

    let total_before: u64 = chunks.iter().map(|c| c.approx_tokens as u64).sum();
    let truncated = total_before > opts.max_tokens as u64;

    let kept = if truncated {
        truncate_to_budget(chunks, opts.max_tokens, opts.keep_newest)
    } else {
        chunks
    };

    let total_tokens: u64 = kept.iter().map(|c| c.approx_tokens as u64).sum();
    let sessions: Vec<String> = {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for c in &kept {
            if seen.insert(c.session_id.clone()) {
                out.push(c.session_id.clone());
            }
        }
        out
    };
    let time_range = kept
        .first()
        .zip(kept.last())
        .map(|(first, last)| (first.start_time, last.end_time));

    Ok(ReconstructResult {
        chunks: kept,
        sessions,
        total_tokens,
        truncated,
        time_range,
    })
}

/// Truncates from the older end when `keep_newest`, otherwise from the
/// newer end. Output order is always chronological ascending.
fn truncate_to_budget(chunks: Vec<Chunk>, max_tokens: u32, keep_newest: bool) -> Vec<Chunk> {
    let mut remaining = max_tokens as i64;
    let mut kept: Vec<Chunk> = Vec::new();

    if keep_newest {
        for c in chunks.into_iter().rev() {
            if remaining - c.approx_tokens as i64 < 0 && !kept.is_empty() {
                break;
            }
            remaining -= c.approx_tokens as i64;
            kept.push(c);
            if remaining <= 0 {
                break;
            }
        }
        kept.reverse();
    } else {
        for c in chunks.into_iter() {
            if remaining - c.approx_tokens as i64 < 0 && !kept.is_empty() {
                break;
            }
            remaining -= c.approx_tokens as i64;
            kept.push(c);
            if remaining <= 0 {
                break;
            }
        }
    }
    kept
}

fn resolve_window(
    chunk_store: &ChunkStore,
    opts: &ReconstructOpts,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>, Option<String>)> {
    match &opts.window {
        WindowSpec::DaysBack(n) => {
            let now = Utc::now();
            Ok((Some(now - Duration::days(*n)), Some(now), None))
        }
        WindowSpec::Range { from, to } => Ok((Some(*from), Some(*to), None)),
        WindowSpec::SessionId(session_id) => {
            let chunks = chunk_store.list_by_session(session_id)?;
            if chunks.is_empty() {
                // Nonexistent session_id is not an error -- empty result.
                return Ok((None, None, None));
            }
            let from = chunks.iter().map(|c| c.start_time).min().unwrap();
            let to = chunks.iter().map(|c| c.end_time).max().unwrap();
            Ok((Some(from), Some(to), Some(session_id.clone())))
        }
        WindowSpec::PreviousSession { current_session_id } => {
            let current = chunk_store.list_by_session(current_session_id)?;
            let Some(current_start) = current.iter().map(|c| c.start_time).min() else {
                return Err(EngineError::InvalidInput(format!(
                    "current_session_id {current_session_id} has no chunks"
                )));
            };
            let sessions = chunk_store.session_summaries(&opts.project, None)?;
            let previous = sessions
                .into_iter()
                .filter(|s| s.start_time < current_start)
                .max_by_key(|s| s.start_time);
            match previous {
                Some(s) => Ok((Some(s.start_time), Some(s.end_time), Some(s.session_id))),
                None => Ok((None, None, None)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use crate::model::ChunkId;
    use chrono::TimeZone;

    fn chunk_at(minute: i64, tokens: u32) -> Chunk {
        let t = Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap();
        let mut clock = VectorClock::new();
        clock.set("a", 1);
        Chunk {
            id: ChunkId::new(),
            session_id: "s1".into(),
            project_slug: "p".into(),
            project_path: None,
            turn_indices: vec![1],
            start_time: t,
            end_time: t,
            content: "x".into(),
            approx_tokens: tokens,
            agent_id: None,
            vector_clock: clock,
            spawn_depth: 0,
            created_at: t,
        }
    }

    #[test]
    fn keep_newest_truncates_from_older_end_and_stays_chronological() {
        let chunks = vec![chunk_at(0, 40), chunk_at(1, 40), chunk_at(2, 40)];
        let kept = truncate_to_budget(chunks.clone(), 50, true);
        assert!(kept.first().unwrap().start_time > chunks[0].start_time);
        assert!(kept.windows(2).all(|w| w[0].start_time <= w[1].start_time));
    }

    #[test]
    fn keep_oldest_truncates_from_newer_end() {
        let chunks = vec![chunk_at(0, 40), chunk_at(1, 40), chunk_at(2, 40)];
        let kept = truncate_to_budget(chunks.clone(), 50, false);
        assert!(kept.last().unwrap().start_time < chunks[2].start_time);
    }
}
