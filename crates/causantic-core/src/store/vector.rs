use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;
use rusqlite::params;
use uuid::Uuid;

use super::Db;
use crate::error::Result;
use crate::model::ChunkId;

/// Chunk-id -> dense embedding; brute-force top-k cosine over an in-memory
/// float matrix (C4). The matrix is read-mostly: `top_k` takes a shared
/// read guard so concurrent queries never block each other; `upsert`/
/// `delete` take the exclusive guard.
#[derive(Clone)]
pub struct VectorStore {
    db: Db,
    matrix: Arc<RwLock<MatrixState>>,
}

#[derive(Default)]
struct MatrixState {
    ids: Vec<ChunkId>,
    index: HashMap<ChunkId, usize>,
    rows: Vec<f32>,
    dim: usize,
}

impl MatrixState {
    fn as_array(&self) -> Option<Array2<f32>> {
        if self.dim == 0 || self.ids.is_empty() {
            return None;
        }
        Array2::from_shape_vec((self.ids.len(), self.dim), self.rows.clone()).ok()
    }

    fn remove(&mut self, id: ChunkId) {
        if let Some(&idx) = self.index.get(&id) {
            let last = self.ids.len() - 1;
            self.ids.swap_remove(idx);
            let start = idx * self.dim;
            let last_start = last * self.dim;
            if idx != last {
                for d in 0..self.dim {
                    self.rows[start + d] = self.rows[last_start + d];
                }
            }
            self.rows.truncate(last * self.dim);
            self.index.remove(&id);
            if idx != last {
                let moved_id = self.ids[idx];
                self.index.insert(moved_id, idx);
            }
        }
    }

    fn upsert(&mut self, id: ChunkId, embedding: &[f32]) {
        if self.dim == 0 {
            self.dim = embedding.len();
        }
        if let Some(&idx) = self.index.get(&id) {
            let start = idx * self.dim;
            self.rows[start..start + self.dim].copy_from_slice(embedding);
        } else {
            self.index.insert(id, self.ids.len());
            self.ids.push(id);
            self.rows.extend_from_slice(embedding);
        }
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

fn cosine(a: ArrayView1<f32>, b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl VectorStore {
    pub fn new(db: Db) -> Result<Self> {
        let rows = db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, embedding FROM vectors WHERE orphaned_at IS NULL")?;
            let rows = stmt.query_map([], |r| {
                let id: String = r.get(0)?;
                let blob: Vec<u8> = r.get(1)?;
                Ok((id, blob))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut state = MatrixState::default();
        for (id, blob) in rows {
            let Ok(uuid) = Uuid::parse_str(&id) else { continue };
            let embedding = decode_blob(&blob);
            state.upsert(ChunkId(uuid), &embedding);
        }

        Ok(VectorStore {
            db,
            matrix: Arc::new(RwLock::new(state)),
        })
    }

    pub fn get(&self, id: ChunkId) -> Result<Option<Vec<f32>>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT embedding FROM vectors WHERE id = ?1",
                params![id.0.to_string()],
                |r| r.get::<_, Vec<u8>>(0),
            )
            .map(|blob| Some(decode_blob(&blob)))
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })
    }

    pub fn count(&self) -> Result<u64> {
        self.db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0)))
    }

    pub fn upsert(&self, id: ChunkId, embedding: &[f32]) -> Result<()> {
        let unit = normalize(embedding);
        let blob = encode_blob(&unit);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vectors (id, embedding, last_accessed) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding, orphaned_at = NULL",
                params![id.0.to_string(), blob, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        self.matrix.write().expect("vector matrix lock poisoned").upsert(id, &unit);
        Ok(())
    }

    pub fn delete(&self, id: ChunkId) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE vectors SET orphaned_at = ?2 WHERE id = ?1",
                params![id.0.to_string(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        self.matrix.write().expect("vector matrix lock poisoned").remove(id);
        Ok(())
    }

    /// Brute-force cosine top-k. `distance` is `1 - cosine_similarity`
    /// against the (normalized) query: 0 for identical direction, larger
    /// for dissimilar vectors. Deterministic given identical inputs.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<(ChunkId, f64)> {
        let unit_query = normalize(query);
        let guard = self.matrix.read().expect("vector matrix lock poisoned");
        let Some(array) = guard.as_array() else {
            return Vec::new();
        };
        let mut scored: Vec<(ChunkId, f64)> = array
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(i, row)| {
                let sim = cosine(row, &unit_query) as f64;
                (guard.ids[i], 1.0 - sim)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

fn encode_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_blob(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_orders_by_cosine_similarity_descending() {
        let db = Db::open_in_memory().unwrap();
        let store = VectorStore::new(db).unwrap();
        let a = ChunkId::new();
        let b = ChunkId::new();
        let c = ChunkId::new();
        store.upsert(a, &[1.0, 0.0]).unwrap();
        store.upsert(b, &[0.0, 1.0]).unwrap();
        store.upsert(c, &[0.7, 0.7]).unwrap();

        let results = store.top_k(&[1.0, 0.0], 3);
        assert_eq!(results[0].0, a);
        assert!(results[0].1 < results.iter().find(|(id, _)| *id == c).unwrap().1);
    }

    #[test]
    fn delete_removes_from_matrix_and_keeps_others_queryable() {
        let db = Db::open_in_memory().unwrap();
        let store = VectorStore::new(db).unwrap();
        let a = ChunkId::new();
        let b = ChunkId::new();
        store.upsert(a, &[1.0, 0.0]).unwrap();
        store.upsert(b, &[0.0, 1.0]).unwrap();
        store.delete(a).unwrap();
        let results = store.top_k(&[1.0, 0.0], 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, b);
    }
}
