//! Persistent stores (C2-C6), all sharing one SQLite connection. Every
//! method here is synchronous; the engine wraps calls in
//! `tokio::task::spawn_blocking` so the async runtime never blocks on
//! SQLite I/O (see the concurrency model).

mod chunk;
mod cluster;
mod edge;
mod keyword;
pub mod schema;
mod vector;

pub use chunk::ChunkStore;
pub use cluster::ClusterStore;
pub use edge::EdgeStore;
pub use keyword::KeywordStore;
pub use vector::VectorStore;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tracing::warn;

use crate::error::{EngineError, Result};

/// Shared handle to the single SQLite connection every store writes
/// through. Cloning shares the same underlying mutex, it does not open a
/// second connection.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

const RETRY_ATTEMPTS: u32 = 3;

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::DDL)?;
        let applied: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
            .unwrap_or(0);
        if applied < schema::SCHEMA_VERSION {
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![schema::SCHEMA_VERSION, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection, retrying a bounded number of times
    /// with exponential backoff when SQLite reports transient lock
    /// contention (`SQLITE_BUSY`). Every other error surfaces immediately.
    pub(crate) fn with_conn<T>(&self, f: impl Fn(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut delay = Duration::from_millis(10);
        for attempt in 0..RETRY_ATTEMPTS {
            let guard = self.conn.lock().expect("sqlite connection mutex poisoned");
            match f(&guard) {
                Ok(v) => return Ok(v),
                Err(rusqlite::Error::SqliteFailure(e, msg))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy && attempt + 1 < RETRY_ATTEMPTS =>
                {
                    drop(guard);
                    warn!(attempt, ?msg, "sqlite busy, retrying");
                    thread::sleep(delay);
                    delay *= 2;
                }
                Err(e) => return Err(EngineError::from(e)),
            }
        }
        Err(EngineError::StoreUnavailable(
            "database locked beyond retry budget".into(),
        ))
    }
}
