use rusqlite::params;
use uuid::Uuid;

use super::Db;
use crate::error::Result;
use crate::model::ChunkId;

/// FTS index over chunk content; BM25-scored lookup with optional project
/// filter (C5). Kept in sync via write triggers over `chunks`, never
/// written to directly.
#[derive(Clone)]
pub struct KeywordStore {
    db: Db,
}

impl KeywordStore {
    pub fn new(db: Db) -> Self {
        KeywordStore { db }
    }

    pub fn search(&self, text: &str, k: usize) -> Result<Vec<(ChunkId, f64)>> {
        self.run_search(text, None, k)
    }

    pub fn search_by_project(&self, text: &str, slug: &str, k: usize) -> Result<Vec<(ChunkId, f64)>> {
        self.run_search(text, Some(slug), k)
    }

    fn run_search(&self, text: &str, slug: Option<&str>, k: usize) -> Result<Vec<(ChunkId, f64)>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = fts_query(text);
        self.db.with_conn(|conn| {
            let rows = match slug {
                Some(slug) => {
                    let mut stmt = conn.prepare(
                        "SELECT c.id, bm25(chunks_fts) AS rank FROM chunks_fts \
                         JOIN chunks c ON c.rowid = chunks_fts.rowid \
                         WHERE chunks_fts MATCH ?1 AND c.project_slug = ?2 \
                         ORDER BY rank ASC LIMIT ?3",
                    )?;
                    stmt.query_map(params![query, slug, k as i64], row_to_hit)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT c.id, bm25(chunks_fts) AS rank FROM chunks_fts \
                         JOIN chunks c ON c.rowid = chunks_fts.rowid \
                         WHERE chunks_fts MATCH ?1 \
                         ORDER BY rank ASC LIMIT ?2",
                    )?;
                    stmt.query_map(params![query, k as i64], row_to_hit)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                }
            };
            Ok(rows)
        })
    }
}

/// BM25 in SQLite's FTS5 returns lower-is-better scores; negate so the
/// rest of the engine's "higher score wins" convention holds uniformly.
fn row_to_hit(row: &rusqlite::Row) -> rusqlite::Result<(ChunkId, f64)> {
    let id: String = row.get(0)?;
    let bm25: f64 = row.get(1)?;
    let uuid = Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        )
    })?;
    Ok((ChunkId(uuid), -bm25))
}

/// FTS5 MATCH treats bare text as an implicit AND of tokens; quoting each
/// word keeps user-supplied punctuation from being parsed as FTS syntax.
fn fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|w| format!("\"{}\"", w.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
