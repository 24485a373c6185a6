//! Library entry point: wires the persistent stores, the embedder, and the
//! decay-curve / RRF / MMR / chain-walk components behind one `Engine`
//! value that's passed explicitly to callers rather than reached for as a
//! global (design note: avoid true process-wide singletons).

pub mod archive;
pub mod assembler;
pub mod chain;
pub mod clock;
pub mod cluster_expand;
pub mod config;
pub mod embed;
pub mod error;
pub mod fuse;
pub mod mmr;
pub mod model;
pub mod reconstruct;
pub mod similarity;
pub mod store;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use assembler::{QueryMode, QueryOpts, RangeScope, Response, ResponseChunk};
pub use reconstruct::{ReconstructOpts, ReconstructResult, WindowSpec};

use crate::assembler::AssemblerDeps;
use crate::clock::DecayCurve;
use crate::config::EngineConfig;
use crate::embed::Embedder;
use crate::error::{EngineError, Result, TaskPanic};
use crate::model::{Chunk, ChunkId, Edge, SessionSummary};
use crate::store::{ChunkStore, ClusterStore, Db, EdgeStore, KeywordStore, VectorStore};

/// One row of `list_projects()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub slug: String,
    pub chunk_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The engine's default decay curve when none is configured explicitly:
/// exponential, losing about 15% of weight per hop.
pub fn default_decay_curve() -> DecayCurve {
    DecayCurve::Exponential { w0: 1.0, r: 0.85 }
}

/// Explicit handle bundling every persistent store plus the embedder and
/// tunables (C1-C13 wired together). Cheap to clone: every field is
/// itself a cheap handle over shared state.
#[derive(Clone)]
pub struct Engine {
    chunks: ChunkStore,
    edges: EdgeStore,
    clusters: ClusterStore,
    vectors: VectorStore,
    keyword: KeywordStore,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
    decay: DecayCurve,
}

impl Engine {
    /// Opens (creating if absent) the SQLite-backed store at `path`.
    pub fn open(path: &Path, embedder: Arc<dyn Embedder>, config: EngineConfig) -> Result<Self> {
        Self::from_db(Db::open(path)?, embedder, config)
    }

    /// In-memory store, useful for tests and ephemeral CLI invocations.
    pub fn open_in_memory(embedder: Arc<dyn Embedder>, config: EngineConfig) -> Result<Self> {
        Self::from_db(Db::open_in_memory()?, embedder, config)
    }

    fn from_db(db: Db, embedder: Arc<dyn Embedder>, config: EngineConfig) -> Result<Self> {
        Ok(Engine {
            chunks: ChunkStore::new(db.clone()),
            edges: EdgeStore::new(db.clone()),
            clusters: ClusterStore::new(db.clone()),
            vectors: VectorStore::new(db.clone())?,
            keyword: KeywordStore::new(db),
            embedder,
            config,
            decay: default_decay_curve(),
        })
    }

    pub fn with_decay_curve(mut self, decay: DecayCurve) -> Self {
        self.decay = decay;
        self
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn edges(&self) -> &EdgeStore {
        &self.edges
    }

    pub fn clusters(&self) -> &ClusterStore {
        &self.clusters
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn keyword(&self) -> &KeywordStore {
        &self.keyword
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared query path for recall/search/predict. Suspends at the
    /// embedding call, each store read, and the vector top-k step (see the
    /// concurrency model); `cancel` is checked before starting and raced
    /// against the assembly future so a late cancellation still aborts
    /// before any partial result is returned.
    async fn query(
        &self,
        text: &str,
        mode: QueryMode,
        opts: QueryOpts,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let deps = AssemblerDeps {
            chunks: &self.chunks,
            edges: &self.edges,
            clusters: &self.clusters,
            vectors: &self.vectors,
            keyword: &self.keyword,
            embedder: self.embedder.as_ref(),
            config: &self.config,
            decay: &self.decay,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = assembler::assemble(&deps, text, mode, &opts) => result,
        }
    }

    pub async fn recall(&self, query: &str, opts: QueryOpts) -> Result<Response> {
        self.query(query, QueryMode::Recall, opts, &CancellationToken::new()).await
    }

    pub async fn recall_cancellable(
        &self,
        query: &str,
        opts: QueryOpts,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.query(query, QueryMode::Recall, opts, cancel).await
    }

    pub async fn search(&self, query: &str, opts: QueryOpts) -> Result<Response> {
        self.query(query, QueryMode::Search, opts, &CancellationToken::new()).await
    }

    pub async fn search_cancellable(
        &self,
        query: &str,
        opts: QueryOpts,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.query(query, QueryMode::Search, opts, cancel).await
    }

    pub async fn predict(&self, discussion: &str, opts: QueryOpts) -> Result<Response> {
        self.query(discussion, QueryMode::Predict, opts, &CancellationToken::new()).await
    }

    pub async fn predict_cancellable(
        &self,
        discussion: &str,
        opts: QueryOpts,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.query(discussion, QueryMode::Predict, opts, cancel).await
    }

    pub async fn reconstruct(&self, opts: ReconstructOpts) -> Result<ReconstructResult> {
        let chunks = self.chunks.clone();
        spawn_blocking(move || reconstruct::reconstruct(&chunks, &opts)).await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let chunks = self.chunks.clone();
        spawn_blocking(move || {
            let mut out = Vec::new();
            for slug in chunks.distinct_projects()? {
                let project_chunks = chunks.list_by_project(&slug, None)?;
                let first_seen = project_chunks.iter().map(|c| c.start_time).min();
                let last_seen = project_chunks.iter().map(|c| c.end_time).max();
                if let (Some(first_seen), Some(last_seen)) = (first_seen, last_seen) {
                    out.push(ProjectSummary {
                        slug,
                        chunk_count: project_chunks.len() as u64,
                        first_seen,
                        last_seen,
                    });
                }
            }
            Ok(out)
        })
        .await
    }

    pub async fn list_sessions(
        &self,
        project: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<SessionSummary>> {
        let chunks = self.chunks.clone();
        let project = project.to_string();
        spawn_blocking(move || chunks.session_summaries(&project, range)).await
    }

    pub async fn upsert_chunk(&self, chunk: Chunk) -> Result<()> {
        let chunks = self.chunks.clone();
        spawn_blocking(move || chunks.upsert(&chunk)).await
    }

    pub async fn upsert_edge(&self, edge: Edge) -> Result<()> {
        let edges = self.edges.clone();
        spawn_blocking(move || edges.upsert(&edge)).await
    }

    pub async fn upsert_vector(&self, id: ChunkId, embedding: Vec<f32>) -> Result<()> {
        let vectors = self.vectors.clone();
        spawn_blocking(move || vectors.upsert(id, &embedding)).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<u64> {
        let chunks = self.chunks.clone();
        let session_id = session_id.to_string();
        spawn_blocking(move || chunks.delete_by_session(&session_id)).await
    }

    pub async fn export_archive(&self, opts: archive::ExportOpts) -> Result<Vec<u8>> {
        let (chunks, edges, clusters, vectors) = self.store_handles();
        spawn_blocking(move || archive::export_archive(&chunks, &edges, &clusters, &vectors, &opts)).await
    }

    pub async fn import_archive(&self, bytes: Vec<u8>, opts: archive::ImportOpts) -> Result<archive::ImportReport> {
        let (chunks, edges, clusters, vectors) = self.store_handles();
        spawn_blocking(move || archive::import_archive(&chunks, &edges, &clusters, &vectors, &bytes, &opts)).await
    }

    fn store_handles(&self) -> (ChunkStore, EdgeStore, ClusterStore, VectorStore) {
        (
            self.chunks.clone(),
            self.edges.clone(),
            self.clusters.clone(),
            self.vectors.clone(),
        )
    }
}

/// Runs a blocking store closure on the blocking thread pool, translating a
/// task panic into a `StoreUnavailable` error rather than propagating it.
async fn spawn_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::from(TaskPanic(e.to_string())))?
}
