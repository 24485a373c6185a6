use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::Db;
use crate::clock::VectorClock;
use crate::error::{EngineError, Result};
use crate::model::{Chunk, ChunkId, SessionSummary};

/// Persistent mapping from chunk id to chunk record, plus by-session and
/// by-time queries (C2).
#[derive(Clone)]
pub struct ChunkStore {
    db: Db,
}

impl ChunkStore {
    pub fn new(db: Db) -> Self {
        ChunkStore { db }
    }

    pub fn get(&self, id: ChunkId) -> Result<Option<Chunk>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM chunks WHERE id = ?1",
                params![id.0.to_string()],
                row_to_chunk,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })
    }

    pub fn list_by_session(&self, session_id: &str) -> Result<Vec<Chunk>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM chunks WHERE session_id = ?1 ORDER BY start_time ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_chunk)?;
            rows.collect()
        })
    }

    pub fn list_by_project(
        &self,
        slug: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Chunk>> {
        self.in_time_range_opt(slug, range)
    }

    pub fn in_time_range(
        &self,
        slug: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Chunk>> {
        self.in_time_range_opt(slug, Some((from, to)))
    }

    fn in_time_range_opt(
        &self,
        slug: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Chunk>> {
        self.db.with_conn(|conn| {
            let chunks = match range {
                Some((from, to)) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM chunks WHERE project_slug = ?1 AND start_time >= ?2 \
                         AND start_time <= ?3 ORDER BY start_time ASC",
                    )?;
                    let rows = stmt.query_map(
                        params![slug, from.to_rfc3339(), to.to_rfc3339()],
                        row_to_chunk,
                    )?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM chunks WHERE project_slug = ?1 ORDER BY start_time ASC",
                    )?;
                    let rows = stmt.query_map(params![slug], row_to_chunk)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(chunks)
        })
    }

    pub fn distinct_projects(&self) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT project_slug FROM chunks ORDER BY project_slug")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect()
        })
    }

    pub fn session_summaries(
        &self,
        project: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<SessionSummary>> {
        let chunks = self.in_time_range_opt(project, range)?;
        let mut by_session: std::collections::BTreeMap<String, SessionSummary> =
            std::collections::BTreeMap::new();
        for c in chunks {
            let entry = by_session
                .entry(c.session_id.clone())
                .or_insert_with(|| SessionSummary {
                    session_id: c.session_id.clone(),
                    project_slug: c.project_slug.clone(),
                    chunk_count: 0,
                    start_time: c.start_time,
                    end_time: c.end_time,
                    total_tokens: 0,
                });
            entry.chunk_count += 1;
            entry.total_tokens += c.approx_tokens as u64;
            entry.start_time = entry.start_time.min(c.start_time);
            entry.end_time = entry.end_time.max(c.end_time);
        }
        Ok(by_session.into_values().collect())
    }

    pub fn upsert(&self, chunk: &Chunk) -> Result<()> {
        chunk.validate().map_err(EngineError::InvalidInput)?;
        let turn_indices = serde_json::to_string(&chunk.turn_indices)?;
        let vector_clock = serde_json::to_string(&chunk.vector_clock)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chunks (id, session_id, session_slug, project_slug, project_path, \
                 turn_indices, start_time, end_time, content, approx_tokens, agent_id, \
                 vector_clock, spawn_depth, created_at) \
                 VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                 ON CONFLICT(id) DO UPDATE SET \
                 session_id=excluded.session_id, project_slug=excluded.project_slug, \
                 project_path=excluded.project_path, turn_indices=excluded.turn_indices, \
                 start_time=excluded.start_time, end_time=excluded.end_time, \
                 content=excluded.content, approx_tokens=excluded.approx_tokens, \
                 agent_id=excluded.agent_id, vector_clock=excluded.vector_clock, \
                 spawn_depth=excluded.spawn_depth",
                params![
                    chunk.id.0.to_string(),
                    chunk.session_id,
                    chunk.project_slug,
                    chunk.project_path,
                    turn_indices,
                    chunk.start_time.to_rfc3339(),
                    chunk.end_time.to_rfc3339(),
                    chunk.content,
                    chunk.approx_tokens,
                    chunk.agent_id,
                    vector_clock,
                    chunk.spawn_depth,
                    chunk.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn delete_by_session(&self, session_id: &str) -> Result<u64> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM chunks WHERE session_id = ?1", params![session_id])?;
            Ok(n as u64)
        })
    }
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    let id: String = row.get("id")?;
    let turn_indices: String = row.get("turn_indices")?;
    let vector_clock: String = row.get("vector_clock")?;
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;

    Ok(Chunk {
        id: ChunkId(Uuid::parse_str(&id).map_err(|e| to_sqlite_err(e))?),
        session_id: row.get("session_id")?,
        project_slug: row.get("project_slug")?,
        project_path: row.get("project_path")?,
        turn_indices: serde_json::from_str(&turn_indices).map_err(|e| to_sqlite_err(e))?,
        start_time: parse_rfc3339(&start_time)?,
        end_time: parse_rfc3339(&end_time)?,
        content: row.get("content")?,
        approx_tokens: row.get("approx_tokens")?,
        agent_id: row.get("agent_id")?,
        vector_clock: serde_json::from_str::<VectorClock>(&vector_clock)
            .map_err(|e| to_sqlite_err(e))?,
        spawn_depth: row.get("spawn_depth")?,
        created_at: parse_rfc3339(&created_at)?,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| to_sqlite_err(e))
}

fn to_sqlite_err(e: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
    )
}
