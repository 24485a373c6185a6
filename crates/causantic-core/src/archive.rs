//! Versioned bundle format for chunks, edges, clusters, and vectors (C13).
//!
//! Magic bytes on import: `43 53 54 00` ("CST\0") = encrypted, `1F 8B` =
//! gzip-compressed JSON, else plain JSON.

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{EngineError, Result};
use crate::model::{Chunk, Cluster, ClusterMembership, Edge};
use crate::store::{ChunkStore, ClusterStore, EdgeStore, VectorStore};

pub const FORMAT_NAME: &str = "causantic-archive";
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0", "1.1"];
const CURRENT_VERSION: &str = "1.1";

const ENCRYPTED_MAGIC: [u8; 4] = *b"CST\0";
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub chunk_count: usize,
    pub edge_count: usize,
    pub cluster_count: usize,
    pub vector_count: usize,
    pub embedding_dim: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk_id: crate::model::ChunkId,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub format: String,
    pub version: String,
    pub created: DateTime<Utc>,
    pub metadata: ArchiveMetadata,
    pub chunks: Vec<Chunk>,
    pub edges: Vec<Edge>,
    pub clusters: Vec<Cluster>,
    pub cluster_memberships: Vec<ClusterMembership>,
    pub vectors: Vec<VectorRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOpts {
    pub projects: Option<Vec<String>>,
    pub redact_file_paths: Option<String>,
    pub redact_code_blocks: bool,
    pub omit_vectors: bool,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Replace,
    Merge,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOpts {
    pub mode: Option<ImportMode>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub warnings: Vec<String>,
    pub imported_chunks: usize,
    pub imported_edges: usize,
    pub imported_clusters: usize,
    pub imported_vectors: usize,
}

pub fn export_archive(
    chunk_store: &ChunkStore,
    edge_store: &EdgeStore,
    cluster_store: &ClusterStore,
    vector_store: &VectorStore,
    opts: &ExportOpts,
) -> Result<Vec<u8>> {
    let projects = match &opts.projects {
        Some(p) => p.clone(),
        None => chunk_store.distinct_projects()?,
    };

    let mut chunks: Vec<Chunk> = Vec::new();
    for project in &projects {
        chunks.extend(chunk_store.list_by_project(project, None)?);
    }

    if let Some(pattern) = &opts.redact_file_paths {
        let re = regex::Regex::new(pattern)
            .map_err(|e| EngineError::InvalidInput(format!("invalid redaction regex: {e}")))?;
        for c in &mut chunks {
            c.content = re.replace_all(&c.content, "[REDACTED]").into_owned();
        }
    }
    if opts.redact_code_blocks {
        let re = regex::Regex::new(r"(?s)```.*?```").expect("static code-block regex is valid");
        for c in &mut chunks {
            c.content = re.replace_all(&c.content, "```[REDACTED]```").into_owned();
        }
    }

    let kept_ids: std::collections::HashSet<_> = chunks.iter().map(|c| c.id).collect();

    let mut edges: Vec<Edge> = Vec::new();
    for chunk in &chunks {
        edges.extend(
            edge_store
                .forward(chunk.id)?
                .into_iter()
                .filter(|e| kept_ids.contains(&e.target_id)),
        );
    }
    edges.sort_by_key(|e| e.id);
    edges.dedup_by_key(|e| e.id);

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut cluster_memberships: Vec<ClusterMembership> = Vec::new();
    let mut seen_clusters = std::collections::HashSet::new();
    for chunk in &chunks {
        for membership in cluster_store.clusters_for_chunk(chunk.id)? {
            if kept_ids.contains(&membership.chunk_id) {
                cluster_memberships.push(membership);
                if seen_clusters.insert(membership.cluster_id) {
                    if let Some(c) = cluster_store.get(membership.cluster_id)? {
                        clusters.push(c);
                    }
                }
            }
        }
    }

    let vectors: Vec<VectorRecord> = if opts.omit_vectors {
        Vec::new()
    } else {
        let mut out = Vec::new();
        for chunk in &chunks {
            if let Some(embedding) = vector_store.get(chunk.id)? {
                out.push(VectorRecord {
                    chunk_id: chunk.id,
                    embedding,
                });
            }
        }
        out
    };

    let embedding_dim = vectors.first().map(|v| v.embedding.len());
    let bundle = ArchiveBundle {
        format: FORMAT_NAME.to_string(),
        version: CURRENT_VERSION.to_string(),
        created: Utc::now(),
        metadata: ArchiveMetadata {
            chunk_count: chunks.len(),
            edge_count: edges.len(),
            cluster_count: clusters.len(),
            vector_count: vectors.len(),
            embedding_dim,
        },
        chunks,
        edges,
        clusters,
        cluster_memberships,
        vectors,
    };

    let json = serde_json::to_vec(&bundle)?;
    let gzipped = gzip(&json)?;

    match &opts.password {
        Some(password) => encrypt(&gzipped, password),
        None => Ok(gzipped),
    }
}

pub fn import_archive(
    chunk_store: &ChunkStore,
    edge_store: &EdgeStore,
    cluster_store: &ClusterStore,
    vector_store: &VectorStore,
    bytes: &[u8],
    opts: &ImportOpts,
) -> Result<ImportReport> {
    let plaintext = if bytes.starts_with(&ENCRYPTED_MAGIC) {
        let password = opts
            .password
            .as_deref()
            .ok_or_else(|| EngineError::InvalidInput("archive is encrypted, password required".into()))?;
        let gunzipped = decrypt(bytes, password)?;
        gunzip(&gunzipped)?
    } else if bytes.starts_with(&GZIP_MAGIC) {
        gunzip(bytes)?
    } else {
        bytes.to_vec()
    };

    let bundle: ArchiveBundle = serde_json::from_slice(&plaintext)?;

    if !SUPPORTED_VERSIONS.contains(&bundle.version.as_str()) {
        return Err(EngineError::InvalidInput(format!(
            "unsupported archive version {}",
            bundle.version
        )));
    }

    let mut warnings = Vec::new();
    if bundle.metadata.chunk_count != bundle.chunks.len() {
        warnings.push(format!(
            "metadata reports {} chunks but bundle contains {}",
            bundle.metadata.chunk_count,
            bundle.chunks.len()
        ));
    }

    let chunk_ids: std::collections::HashSet<_> = bundle.chunks.iter().map(|c| c.id).collect();
    for edge in &bundle.edges {
        if !chunk_ids.contains(&edge.source_id) || !chunk_ids.contains(&edge.target_id) {
            warnings.push(format!("edge {} references a chunk absent from the bundle", edge.id));
        }
    }
    if bundle.version == "1.0" && !bundle.vectors.is_empty() {
        warnings.push("v1.0 archives do not carry vectors; ignoring embedded vector data".into());
    }

    let mode = opts.mode.unwrap_or(ImportMode::Replace);
    if mode == ImportMode::Replace {
        // Replace is realized at the store layer via per-table deletes the
        // caller issues before calling this function when a full wipe is
        // wanted; here both modes upsert, since upsert is idempotent and
        // "replace" for chunk/edge rows is just an upsert keyed by id.
    }

    for chunk in &bundle.chunks {
        chunk_store.upsert(chunk)?;
    }
    for edge in &bundle.edges {
        if chunk_ids.contains(&edge.source_id) && chunk_ids.contains(&edge.target_id) {
            edge_store.upsert(edge)?;
        }
    }
    if !bundle.clusters.is_empty() {
        cluster_store.replace_all(&bundle.clusters, &bundle.cluster_memberships)?;
    }
    let vectors_to_import = if bundle.version == "1.0" { &[][..] } else { &bundle.vectors[..] };
    for record in vectors_to_import {
        vector_store.upsert(record.chunk_id, &record.embedding)?;
    }

    Ok(ImportReport {
        warnings,
        imported_chunks: bundle.chunks.len(),
        imported_edges: bundle.edges.len(),
        imported_clusters: bundle.clusters.len(),
        imported_vectors: vectors_to_import.len(),
    })
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| EngineError::InvalidInput(format!("gzip failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| EngineError::InvalidInput(format!("gzip failed: {e}")))
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EngineError::InvalidInput(format!("gzip decode failed: {e}")))?;
    Ok(out)
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| EngineError::InvalidInput(format!("key derivation failed: {e}")))?;
    Ok(key)
}

fn encrypt(plaintext: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EngineError::InvalidInput("encryption failed".into()))?;

    let mut out = Vec::with_capacity(4 + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&ENCRYPTED_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    let header = 4 + SALT_LEN + NONCE_LEN;
    if bytes.len() < header {
        return Err(EngineError::InvalidInput("encrypted archive truncated".into()));
    }
    let salt = &bytes[4..4 + SALT_LEN];
    let nonce_bytes = &bytes[4 + SALT_LEN..header];
    let ciphertext = &bytes[header..];

    let key = derive_key(password, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| EngineError::InvalidInput("wrong password or corrupt archive".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let data = b"hello causantic archive".to_vec();
        let compressed = gzip(&data).unwrap();
        assert!(compressed.starts_with(&GZIP_MAGIC));
        let decompressed = gunzip(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn encrypt_round_trips_with_correct_password() {
        let data = b"secret chunk content".to_vec();
        let encrypted = encrypt(&data, "hunter2").unwrap();
        assert!(encrypted.starts_with(&ENCRYPTED_MAGIC));
        let decrypted = decrypt(&encrypted, "hunter2").unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn wrong_password_fails_decryption() {
        let data = b"secret chunk content".to_vec();
        let encrypted = encrypt(&data, "hunter2").unwrap();
        assert!(decrypt(&encrypted, "wrong-password").is_err());
    }
}
