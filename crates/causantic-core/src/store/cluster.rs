use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::Db;
use crate::error::Result;
use crate::model::{Cluster, ClusterId, ClusterMembership};
use crate::model::ChunkId;

/// Cluster metadata, member distances, centroids (C6). Consumes precomputed
/// clusters wholesale via `replace_all`; never computes membership itself.
#[derive(Clone)]
pub struct ClusterStore {
    db: Db,
}

impl ClusterStore {
    pub fn new(db: Db) -> Self {
        ClusterStore { db }
    }

    pub fn get(&self, id: ClusterId) -> Result<Option<Cluster>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, centroid, exemplar_ids, membership_hash, \
                 created_at, refreshed_at FROM clusters WHERE id = ?1",
                params![id.0.to_string()],
                row_to_cluster,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })
    }

    pub fn members(&self, cluster_id: ClusterId) -> Result<Vec<ClusterMembership>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_id, cluster_id, distance FROM chunk_clusters \
                 WHERE cluster_id = ?1 ORDER BY distance ASC",
            )?;
            let rows = stmt.query_map(params![cluster_id.0.to_string()], row_to_membership)?;
            rows.collect()
        })
    }

    pub fn clusters_for_chunk(&self, chunk_id: ChunkId) -> Result<Vec<ClusterMembership>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_id, cluster_id, distance FROM chunk_clusters \
                 WHERE chunk_id = ?1 ORDER BY distance ASC",
            )?;
            let rows = stmt.query_map(params![chunk_id.0.to_string()], row_to_membership)?;
            rows.collect()
        })
    }

    pub fn centroid(&self, id: ClusterId) -> Result<Option<Vec<f32>>> {
        Ok(self.get(id)?.and_then(|c| c.centroid))
    }

    /// Atomically replaces all cluster metadata and membership rows.
    pub fn replace_all(&self, clusters: &[Cluster], memberships: &[ClusterMembership]) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            let result = (|| -> rusqlite::Result<()> {
                conn.execute("DELETE FROM chunk_clusters", [])?;
                conn.execute("DELETE FROM clusters", [])?;
                for c in clusters {
                    let centroid_blob = c
                        .centroid
                        .as_ref()
                        .map(|v| v.iter().flat_map(|f| f.to_le_bytes()).collect::<Vec<u8>>());
                    let exemplar_ids: Vec<String> =
                        c.exemplar_ids.iter().map(|id| id.0.to_string()).collect();
                    conn.execute(
                        "INSERT INTO clusters (id, name, description, centroid, exemplar_ids, \
                         membership_hash, created_at, refreshed_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            c.id.0.to_string(),
                            c.name,
                            c.description,
                            centroid_blob,
                            serde_json::to_string(&exemplar_ids).unwrap_or_default(),
                            c.membership_hash,
                            c.created_at.to_rfc3339(),
                            c.refreshed_at.to_rfc3339(),
                        ],
                    )?;
                }
                for m in memberships {
                    conn.execute(
                        "INSERT INTO chunk_clusters (chunk_id, cluster_id, distance) \
                         VALUES (?1, ?2, ?3)",
                        params![m.chunk_id.0.to_string(), m.cluster_id.0.to_string(), m.distance],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => conn.execute_batch("COMMIT")?,
                Err(e) => {
                    conn.execute_batch("ROLLBACK").ok();
                    return Err(e);
                }
            }
            Ok(())
        })
    }
}

fn row_to_cluster(row: &rusqlite::Row) -> rusqlite::Result<Cluster> {
    let id: String = row.get(0)?;
    let centroid_blob: Option<Vec<u8>> = row.get(3)?;
    let exemplar_ids_json: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let refreshed_at: String = row.get(7)?;

    let exemplar_ids: Vec<String> = serde_json::from_str(&exemplar_ids_json).unwrap_or_default();

    Ok(Cluster {
        id: ClusterId(Uuid::parse_str(&id).map_err(to_sqlite_err)?),
        name: row.get(1)?,
        description: row.get(2)?,
        centroid: centroid_blob.map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }),
        exemplar_ids: exemplar_ids
            .iter()
            .filter_map(|s| Uuid::parse_str(s).ok())
            .map(ChunkId)
            .collect(),
        membership_hash: row.get(5)?,
        created_at: parse_rfc3339(&created_at)?,
        refreshed_at: parse_rfc3339(&refreshed_at)?,
    })
}

fn row_to_membership(row: &rusqlite::Row) -> rusqlite::Result<ClusterMembership> {
    let chunk_id: String = row.get(0)?;
    let cluster_id: String = row.get(1)?;
    Ok(ClusterMembership {
        chunk_id: ChunkId(Uuid::parse_str(&chunk_id).map_err(to_sqlite_err)?),
        cluster_id: ClusterId(Uuid::parse_str(&cluster_id).map_err(to_sqlite_err)?),
        distance: row.get(2)?,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(to_sqlite_err)
}

fn to_sqlite_err(e: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
    )
}
