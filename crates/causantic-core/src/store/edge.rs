use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::Db;
use crate::clock::VectorClock;
use crate::error::{EngineError, Result};
use crate::model::{ChunkId, Edge, EdgeId, EdgeType, ReferenceType};

/// Typed directed edges with weight and clock; forward/backward adjacency
/// (C3).
#[derive(Clone)]
pub struct EdgeStore {
    db: Db,
}

impl EdgeStore {
    pub fn new(db: Db) -> Self {
        EdgeStore { db }
    }

    pub fn forward(&self, id: ChunkId) -> Result<Vec<Edge>> {
        self.by_endpoint("source_chunk_id", id)
    }

    pub fn backward(&self, id: ChunkId) -> Result<Vec<Edge>> {
        self.by_endpoint("target_chunk_id", id)
    }

    fn by_endpoint(&self, column: &str, id: ChunkId) -> Result<Vec<Edge>> {
        let sql = format!("SELECT * FROM edges WHERE {column} = ?1");
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![id.0.to_string()], row_to_edge)?;
            rows.collect()
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0)))
    }

    /// Merges by `(source, target, reference_type)`, bumping `link_count`
    /// when the same reference recurs.
    pub fn upsert(&self, edge: &Edge) -> Result<()> {
        edge.validate().map_err(EngineError::InvalidInput)?;
        let vector_clock = serde_json::to_string(&edge.vector_clock)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO edges (id, source_chunk_id, target_chunk_id, edge_type, \
                 reference_type, initial_weight, link_count, created_at, vector_clock) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(source_chunk_id, target_chunk_id, reference_type) DO UPDATE SET \
                 link_count = link_count + 1, vector_clock = excluded.vector_clock",
                params![
                    edge.id.0.to_string(),
                    edge.source_id.0.to_string(),
                    edge.target_id.0.to_string(),
                    edge_type_str(edge.edge_type),
                    reference_type_str(&edge.reference_type),
                    edge.initial_weight,
                    edge.link_count,
                    edge.created_at.to_rfc3339(),
                    vector_clock,
                ],
            )?;
            Ok(())
        })
    }
}

fn edge_type_str(t: EdgeType) -> &'static str {
    match t {
        EdgeType::Forward => "forward",
        EdgeType::Backward => "backward",
    }
}

fn reference_type_str(t: &ReferenceType) -> String {
    match t {
        ReferenceType::WithinChain => "within-chain".into(),
        ReferenceType::FilePath => "file-path".into(),
        ReferenceType::CodeEntity => "code-entity".into(),
        ReferenceType::ExplicitBackref => "explicit-backref".into(),
        ReferenceType::ErrorFragment => "error-fragment".into(),
        ReferenceType::ToolOutput => "tool-output".into(),
        ReferenceType::CrossSession => "cross-session".into(),
        ReferenceType::Adjacent => "adjacent".into(),
        ReferenceType::Other(s) => s.clone(),
    }
}

fn reference_type_from_str(s: &str) -> ReferenceType {
    match s {
        "within-chain" => ReferenceType::WithinChain,
        "file-path" => ReferenceType::FilePath,
        "code-entity" => ReferenceType::CodeEntity,
        "explicit-backref" => ReferenceType::ExplicitBackref,
        "error-fragment" => ReferenceType::ErrorFragment,
        "tool-output" => ReferenceType::ToolOutput,
        "cross-session" => ReferenceType::CrossSession,
        "adjacent" => ReferenceType::Adjacent,
        other => ReferenceType::Other(other.to_string()),
    }
}

fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    let id: String = row.get("id")?;
    let source: String = row.get("source_chunk_id")?;
    let target: String = row.get("target_chunk_id")?;
    let edge_type: String = row.get("edge_type")?;
    let reference_type: String = row.get("reference_type")?;
    let created_at: String = row.get("created_at")?;
    let vector_clock: String = row.get("vector_clock")?;

    Ok(Edge {
        id: EdgeId(parse_uuid(&id)?),
        source_id: ChunkId(parse_uuid(&source)?),
        target_id: ChunkId(parse_uuid(&target)?),
        edge_type: if edge_type == "forward" {
            EdgeType::Forward
        } else {
            EdgeType::Backward
        },
        reference_type: reference_type_from_str(&reference_type),
        initial_weight: row.get("initial_weight")?,
        link_count: row.get("link_count")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(to_sqlite_err)?,
        vector_clock: serde_json::from_str::<VectorClock>(&vector_clock).map_err(to_sqlite_err)?,
    })
}

fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(to_sqlite_err)
}

fn to_sqlite_err(e: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
    )
}
