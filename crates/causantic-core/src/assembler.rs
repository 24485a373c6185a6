//! Orchestrates vector + keyword search, RRF fusion, cluster expansion,
//! MMR reranking, and optional chain-walk expansion into a token-budgeted
//! assembled context (C11).

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::chain::{self, ChainWalkConfig, Direction};
use crate::clock::{DecayCurve, VectorClock};
use crate::cluster_expand::{self, ClusterExpandConfig};
use crate::config::EngineConfig;
use crate::embed::Embedder;
use crate::error::Result;
use crate::fuse::{self, RankedSource};
use crate::mmr::{self, MmrConfig};
use crate::model::{ChunkId, RankedItem, SourceTag};
use crate::store::{ChunkStore, ClusterStore, EdgeStore, KeywordStore, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Recall,
    Search,
    Predict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeScope {
    Short,
    Long,
}

#[derive(Debug, Clone)]
pub struct QueryOpts {
    pub project_filter: Option<String>,
    pub range: RangeScope,
    pub max_tokens: u32,
    pub vector_search_limit: Option<usize>,
    pub mmr_lambda: Option<f64>,
    pub cluster_expansion: bool,
    pub chain_walk: bool,
}

impl Default for QueryOpts {
    fn default() -> Self {
        QueryOpts {
            project_filter: None,
            range: RangeScope::Short,
            max_tokens: 8_000,
            vector_search_limit: None,
            mmr_lambda: None,
            cluster_expansion: true,
            chain_walk: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseChunk {
    pub id: ChunkId,
    pub session_slug: String,
    pub weight: f64,
    pub preview: String,
    pub source_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub chunks: Vec<ResponseChunk>,
    pub text: String,
    pub token_count: u32,
    pub total_considered: usize,
    pub elapsed_ms: u64,
    pub degraded: bool,
    pub timed_out: bool,
}

impl Response {
    fn empty() -> Self {
        Response {
            chunks: vec![],
            text: String::new(),
            token_count: 0,
            total_considered: 0,
            elapsed_ms: 0,
            degraded: false,
            timed_out: false,
        }
    }
}

const PREVIEW_CHARS: usize = 160;

pub struct AssemblerDeps<'a> {
    pub chunks: &'a ChunkStore,
    pub edges: &'a EdgeStore,
    pub clusters: &'a ClusterStore,
    pub vectors: &'a VectorStore,
    pub keyword: &'a KeywordStore,
    pub embedder: &'a dyn Embedder,
    pub config: &'a EngineConfig,
    pub decay: &'a DecayCurve,
}

#[instrument(skip(deps), fields(mode = ?mode))]
pub async fn assemble(
    deps: &AssemblerDeps<'_>,
    query_text: &str,
    mode: QueryMode,
    opts: &QueryOpts,
) -> Result<Response> {
    let started = std::time::Instant::now();

    if opts.max_tokens == 0 {
        return Ok(Response::empty());
    }

    let max_tokens = match mode {
        QueryMode::Predict => opts.max_tokens / 2,
        _ => opts.max_tokens,
    };

    // Step 1: embed the query. Missing model degrades to keyword-only
    // rather than failing the whole call.
    let (query_embedding, degraded) = match deps.embedder.embed(query_text).await {
        Ok(v) => (Some(v), false),
        Err(_) => (None, true),
    };

    let vector_limit = opts
        .vector_search_limit
        .unwrap_or(deps.config.vector_search_limit);

    // Step 2: vector top-k and FTS top-k, both respecting project_filter.
    let vector_hits: Vec<(ChunkId, f64)> = match &query_embedding {
        Some(embedding) => deps.vectors.top_k(embedding, vector_limit),
        None => Vec::new(),
    };
    let keyword_hits: Vec<(ChunkId, f64)> = match &opts.project_filter {
        Some(slug) => deps.keyword.search_by_project(query_text, slug, vector_limit)?,
        None => deps.keyword.search(query_text, vector_limit)?,
    };
    let vector_hits = filter_by_project(deps, vector_hits, &opts.project_filter)?;

    debug!(vector_hits = vector_hits.len(), keyword_hits = keyword_hits.len());

    // Step 3: RRF-fuse. `search` mode biases keyword 1.5x vector.
    let (vector_weight, keyword_weight) = match mode {
        QueryMode::Search => (1.0, 1.5),
        _ => (1.0, 1.0),
    };
    let sources = vec![
        RankedSource {
            items: vector_hits.iter().map(|(id, _)| (*id, SourceTag::Vector)).collect(),
            weight: vector_weight,
        },
        RankedSource {
            items: keyword_hits.iter().map(|(id, _)| (*id, SourceTag::Keyword)).collect(),
            weight: keyword_weight,
        },
    ];
    let mut seeds = fuse::rrf_fuse(&sources, deps.config.rrf_k);

    if seeds.is_empty() {
        return Ok(Response::empty());
    }

    // Step 4: cluster expansion.
    let expand_clusters = opts.cluster_expansion || mode == QueryMode::Predict;
    if expand_clusters {
        let cluster_cfg = ClusterExpandConfig {
            max_clusters: deps.config.cluster_max_clusters,
            max_siblings: deps.config.cluster_max_siblings,
            boost_factor: deps.config.cluster_boost_factor,
        };
        seeds = cluster_expand::expand_with_clusters(&seeds, deps.clusters, &cluster_cfg)?;
    }

    // Step 5: MMR rerank.
    let mmr_lambda = opts.mmr_lambda.unwrap_or(deps.config.mmr_lambda);
    let mmr_cfg = MmrConfig {
        lambda: mmr_lambda,
        threshold: deps.config.mmr_threshold,
    };
    let embedding_lookup = |id: ChunkId| deps.vectors.get(id).ok().flatten();
    let mut ranked = mmr::mmr_rerank(&seeds, query_embedding.as_deref(), &embedding_lookup, &mmr_cfg);

    // Step 6: optional chain walk, respecting range -> direction mapping.
    let mut prepend: Vec<RankedItem> = Vec::new();
    let mut append: Vec<RankedItem> = Vec::new();
    if opts.chain_walk && !ranked.is_empty() {
        let mut has_outgoing = false;
        for seed in &ranked {
            if !deps.edges.forward(seed.chunk_id)?.is_empty()
                || !deps.edges.backward(seed.chunk_id)?.is_empty()
            {
                has_outgoing = true;
                break;
            }
        }
        if has_outgoing {
            let reference_clock = reference_clock(deps, &opts.project_filter)?;
            let seed_ids: Vec<ChunkId> = ranked.iter().map(|r| r.chunk_id).collect();
            let sub_budget = max_tokens / 2;

            let directions: Vec<Direction> = match opts.range {
                RangeScope::Short => vec![Direction::Backward],
                RangeScope::Long => vec![Direction::Backward, Direction::Forward],
            };

            for direction in directions {
                let cfg = ChainWalkConfig {
                    direction,
                    token_budget: sub_budget,
                    max_depth: None,
                    min_weight: deps.config.min_weight,
                };
                let chains = chain::walk_chains(
                    &seed_ids,
                    &cfg,
                    &reference_clock,
                    deps.decay,
                    query_embedding.as_deref(),
                    deps.chunks,
                    deps.edges,
                    &embedding_lookup,
                )?;
                for c in chains {
                    for (idx, id) in c.chunk_ids.iter().enumerate().skip(1) {
                        let item = RankedItem {
                            chunk_id: *id,
                            score: *c.node_scores.get(idx).unwrap_or(&0.0),
                            source: SourceTag::Graph,
                        };
                        match direction {
                            Direction::Backward => prepend.push(item),
                            Direction::Forward => append.push(item),
                        }
                    }
                }
            }
        }
    }

    let seen: std::collections::HashSet<ChunkId> = ranked.iter().map(|r| r.chunk_id).collect();
    prepend.retain(|i| !seen.contains(&i.chunk_id));
    append.retain(|i| !seen.contains(&i.chunk_id));

    let mut ordered: Vec<RankedItem> = Vec::with_capacity(prepend.len() + ranked.len() + append.len());
    ordered.append(&mut prepend);
    ordered.append(&mut ranked);
    ordered.append(&mut append);

    // Step 7+8: token-budgeted accumulation and assembly.
    let total_considered = ordered.len();
    let mut response_chunks = Vec::new();
    let mut text = String::new();
    let mut running_tokens: u32 = 0;

    for item in &ordered {
        let Some(chunk) = deps.chunks.get(item.chunk_id)? else {
            continue;
        };
        if running_tokens + chunk.approx_tokens > max_tokens {
            break;
        }
        running_tokens += chunk.approx_tokens;

        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&format!("--- chunk {} ({}) ---\n", chunk.id, item.source));
        text.push_str(&chunk.content);

        let preview: String = chunk.content.chars().take(PREVIEW_CHARS).collect();
        response_chunks.push(ResponseChunk {
            id: chunk.id,
            session_slug: chunk.session_id.clone(),
            weight: item.score,
            preview,
            source_tag: item.source.to_string(),
        });
    }

    Ok(Response {
        chunks: response_chunks,
        text,
        token_count: running_tokens,
        total_considered,
        elapsed_ms: started.elapsed().as_millis() as u64,
        degraded,
        timed_out: false,
    })
}

fn filter_by_project(
    deps: &AssemblerDeps<'_>,
    hits: Vec<(ChunkId, f64)>,
    project_filter: &Option<String>,
) -> Result<Vec<(ChunkId, f64)>> {
    let Some(slug) = project_filter else {
        return Ok(hits);
    };
    let mut out = Vec::with_capacity(hits.len());
    for (id, score) in hits {
        if let Some(chunk) = deps.chunks.get(id)? {
            if &chunk.project_slug == slug {
                out.push((id, score));
            }
        }
    }
    Ok(out)
}

fn reference_clock(deps: &AssemblerDeps<'_>, project_filter: &Option<String>) -> Result<VectorClock> {
    let projects: Vec<String> = match project_filter {
        Some(p) => vec![p.clone()],
        None => deps.chunks.distinct_projects()?,
    };
    let mut clocks = Vec::new();
    for project in projects {
        for chunk in deps.chunks.list_by_project(&project, None)? {
            clocks.push(chunk.vector_clock);
        }
    }
    Ok(VectorClock::merge_all(clocks.iter()))
}
