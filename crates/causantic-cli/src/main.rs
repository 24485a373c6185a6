//! CLI for the causantic long-term conversational memory store.
//!
//! Subcommands:
//!  - `recall`, `search`, `predict` : the three retrieval query modes (C11).
//!  - `reconstruct`                 : chronological session replay (C12).
//!  - `list-projects`, `list-sessions` : store-level listings.
//!  - `archive export`, `archive import` : versioned bundle codec (C13).
//!
//! Transcript ingestion, the ONNX embedding model, and MCP tool dispatch are
//! external collaborators this binary does not implement; it opens a store
//! already populated by them and talks to it through `causantic_core::Engine`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use causantic_core::archive::{ExportOpts, ImportMode, ImportOpts};
use causantic_core::config::EngineConfig;
use causantic_core::embed::{Embedder, FakeEmbedder};
use causantic_core::error::EngineError;
use causantic_core::{Engine, QueryOpts, RangeScope, ReconstructOpts, Response, WindowSpec};

#[derive(Parser)]
#[command(
    name = "causantic",
    about = "causantic CLI -- query a long-term conversational memory store",
    version
)]
struct Cli {
    /// Path to the SQLite store. Created empty if absent.
    #[arg(long, global = true, value_name = "PATH", default_value = "causantic.db")]
    db: PathBuf,

    /// Optional TOML config file overriding engine tunables.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of formatted text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Balanced retrieval: vector + keyword fusion, cluster expansion, MMR, chain walk.
    Recall(QueryArgs),
    /// Lexical-biased retrieval (keyword weighted 1.5x vector in fusion).
    Search(QueryArgs),
    /// Predictive retrieval over the current discussion context; half budget, always cluster-expanded.
    Predict(QueryArgs),
    /// Chronological replay of a session or time window under a token budget.
    Reconstruct(ReconstructArgs),
    /// List every project the store has chunks for.
    ListProjects,
    /// List session summaries for one project.
    ListSessions(ListSessionsArgs),
    /// Export or import a versioned archive bundle.
    Archive(ArchiveArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Query text (for recall/search) or current discussion context (for predict).
    query: String,

    /// Restrict to one project slug.
    #[arg(long)]
    project: Option<String>,

    /// Traversal range: `short` (backward chain-walk only) or `long` (both directions).
    #[arg(long, default_value = "short")]
    range: String,

    /// Token budget for the assembled response.
    #[arg(long, default_value_t = 8_000)]
    max_tokens: u32,

    /// Override the vector top-k search limit.
    #[arg(long)]
    vector_search_limit: Option<usize>,

    /// Override the MMR lambda (relevance vs. diversity tradeoff).
    #[arg(long)]
    mmr_lambda: Option<f64>,

    /// Disable cluster-sibling expansion.
    #[arg(long)]
    no_cluster_expansion: bool,

    /// Disable causal chain-walk expansion.
    #[arg(long)]
    no_chain_walk: bool,
}

#[derive(Args, Debug)]
struct ReconstructArgs {
    /// Project slug to reconstruct within.
    #[arg(long)]
    project: String,

    /// Reconstruct exactly one session by id.
    #[arg(long, conflicts_with_all = ["from", "days_back", "previous_session"])]
    session_id: Option<String>,

    /// Start of an explicit time window (RFC3339).
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// End of an explicit time window (RFC3339).
    #[arg(long, requires = "from")]
    to: Option<String>,

    /// Look back this many days from now.
    #[arg(long, conflicts_with_all = ["from", "session_id", "previous_session"])]
    days_back: Option<i64>,

    /// Reconstruct the session immediately preceding `current_session_id`.
    #[arg(long)]
    previous_session: bool,

    /// Required with `--previous-session`: the session to look backward from.
    #[arg(long)]
    current_session_id: Option<String>,

    /// Token budget for the reconstructed replay.
    #[arg(long, default_value_t = 50_000)]
    max_tokens: u32,

    /// Truncate from the older end (default) instead of the newer end when over budget.
    #[arg(long, default_value_t = true)]
    keep_newest: bool,
}

#[derive(Args, Debug)]
struct ListSessionsArgs {
    /// Project slug.
    #[arg(long)]
    project: String,

    /// Restrict to sessions starting on/after this RFC3339 instant.
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// Restrict to sessions ending on/before this RFC3339 instant.
    #[arg(long, requires = "from")]
    to: Option<String>,

    /// Look back this many days from now instead of an explicit range.
    #[arg(long, conflicts_with_all = ["from", "to"])]
    days_back: Option<i64>,
}

#[derive(Args, Debug)]
struct ArchiveArgs {
    #[command(subcommand)]
    command: ArchiveCommands,
}

#[derive(Subcommand)]
enum ArchiveCommands {
    /// Write a bundle of chunks/edges/clusters/vectors to disk.
    Export(ArchiveExportArgs),
    /// Load a bundle produced by `export` into the store.
    Import(ArchiveImportArgs),
}

#[derive(Args, Debug)]
struct ArchiveExportArgs {
    /// Destination path for the bundle.
    #[arg(long, short = 'o')]
    out: PathBuf,

    /// Restrict the export to these project slugs (repeatable). Defaults to all projects.
    #[arg(long = "project")]
    projects: Vec<String>,

    /// Replace file paths matching this regex with `[REDACTED]`.
    #[arg(long)]
    redact_file_paths: Option<String>,

    /// Replace fenced code blocks (```...```) with a redaction marker.
    #[arg(long)]
    redact_code_blocks: bool,

    /// Omit embeddings from the bundle.
    #[arg(long)]
    omit_vectors: bool,

    /// Encrypt the bundle with a password-derived ChaCha20-Poly1305 key.
    #[arg(long)]
    password: Option<String>,
}

#[derive(Args, Debug)]
struct ArchiveImportArgs {
    /// Path to a previously exported bundle.
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Password for an encrypted bundle.
    #[arg(long)]
    password: Option<String>,

    /// `replace` wipes clusters before loading; `merge` upserts everything in place.
    #[arg(long, default_value = "merge")]
    mode: String,
}

/// TOML config file shape; every field overrides the matching `EngineConfig`
/// field only when present, so a config file can tune a subset of knobs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    rrf_k: Option<f64>,
    vector_search_limit: Option<usize>,
    mmr_lambda: Option<f64>,
    mmr_threshold: Option<usize>,
    cluster_max_clusters: Option<usize>,
    cluster_max_siblings: Option<usize>,
    cluster_boost_factor: Option<f64>,
    min_weight: Option<f64>,
    store_retry_attempts: Option<u32>,
}

impl ConfigFile {
    fn apply(self, mut cfg: EngineConfig) -> EngineConfig {
        if let Some(v) = self.rrf_k {
            cfg.rrf_k = v;
        }
        if let Some(v) = self.vector_search_limit {
            cfg.vector_search_limit = v;
        }
        if let Some(v) = self.mmr_lambda {
            cfg.mmr_lambda = v;
        }
        if let Some(v) = self.mmr_threshold {
            cfg.mmr_threshold = v;
        }
        if let Some(v) = self.cluster_max_clusters {
            cfg.cluster_max_clusters = v;
        }
        if let Some(v) = self.cluster_max_siblings {
            cfg.cluster_max_siblings = v;
        }
        if let Some(v) = self.cluster_boost_factor {
            cfg.cluster_boost_factor = v;
        }
        if let Some(v) = self.min_weight {
            cfg.min_weight = v;
        }
        if let Some(v) = self.store_retry_attempts {
            cfg.store_retry_attempts = v;
        }
        cfg
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let base = EngineConfig::default();
    let Some(path) = path else {
        return Ok(base);
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(file.apply(base))
}

fn default_embedder() -> Arc<dyn Embedder> {
    Arc::new(FakeEmbedder::default())
}

/// Spawns a Ctrl-C watcher that cancels the returned token, so a query
/// interrupted mid-flight stops at its next suspension point instead of
/// running to completion.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let watched = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watched.cancel();
        }
    });
    token
}

fn parse_range(s: &str) -> Result<RangeScope> {
    match s {
        "short" => Ok(RangeScope::Short),
        "long" => Ok(RangeScope::Long),
        other => anyhow::bail!("invalid --range {other:?}: expected \"short\" or \"long\""),
    }
}

fn parse_rfc3339(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&chrono::Utc))
        .with_context(|| format!("invalid RFC3339 timestamp {s:?}"))
}

fn query_opts(args: &QueryArgs) -> Result<QueryOpts> {
    Ok(QueryOpts {
        project_filter: args.project.clone(),
        range: parse_range(&args.range)?,
        max_tokens: args.max_tokens,
        vector_search_limit: args.vector_search_limit,
        mmr_lambda: args.mmr_lambda,
        cluster_expansion: !args.no_cluster_expansion,
        chain_walk: !args.no_chain_walk,
    })
}

fn print_response(resp: &Response, as_json: bool) {
    if as_json {
        println!("{}", serde_json::to_string_pretty(resp).unwrap_or_default());
        return;
    }
    if resp.degraded {
        eprintln!("(degraded: embedding model unavailable, keyword-only results)");
    }
    if resp.timed_out {
        eprintln!("(timed out: partial results)");
    }
    for chunk in &resp.chunks {
        println!(
            "[{}] {} (weight {:.3}, {})",
            chunk.source_tag, chunk.session_slug, chunk.weight, chunk.id
        );
        println!("    {}", chunk.preview);
    }
    println!(
        "-- {} chunks, {} tokens, {} considered, {}ms",
        resp.chunks.len(),
        resp.token_count,
        resp.total_considered,
        resp.elapsed_ms
    );
}

async fn run(cli: Cli) -> Result<(), EngineError> {
    let config = load_config(cli.config.as_ref())
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
    let engine = Engine::open(&cli.db, default_embedder(), config)
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;

    match cli.command {
        Commands::Recall(args) => {
            let opts = query_opts(&args).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
            let cancel = ctrl_c_token();
            let resp = engine.recall_cancellable(&args.query, opts, &cancel).await?;
            print_response(&resp, cli.json);
        }
        Commands::Search(args) => {
            let opts = query_opts(&args).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
            let cancel = ctrl_c_token();
            let resp = engine.search_cancellable(&args.query, opts, &cancel).await?;
            print_response(&resp, cli.json);
        }
        Commands::Predict(args) => {
            let opts = query_opts(&args).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
            let cancel = ctrl_c_token();
            let resp = engine.predict_cancellable(&args.query, opts, &cancel).await?;
            print_response(&resp, cli.json);
        }
        Commands::Reconstruct(args) => {
            let window = resolve_window(&args).map_err(|e| EngineError::InvalidInput(e.to_string()))?;
            let opts = ReconstructOpts {
                window,
                project: args.project,
                max_tokens: args.max_tokens,
                keep_newest: args.keep_newest,
            };
            let result = engine.reconstruct(opts).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
            } else {
                for chunk in &result.chunks {
                    println!("[{}] {}", chunk.session_id, chunk.content);
                }
                println!(
                    "-- {} sessions, {} tokens, truncated={}",
                    result.sessions.len(),
                    result.total_tokens,
                    result.truncated
                );
            }
        }
        Commands::ListProjects => {
            let projects = engine.list_projects().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&projects).unwrap_or_default());
            } else {
                for p in &projects {
                    println!(
                        "{}  chunks={}  first={}  last={}",
                        p.slug, p.chunk_count, p.first_seen, p.last_seen
                    );
                }
            }
        }
        Commands::ListSessions(args) => {
            let range = resolve_list_sessions_range(&args)
                .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
            let sessions = engine.list_sessions(&args.project, range).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&sessions).unwrap_or_default());
            } else {
                for s in &sessions {
                    println!(
                        "{}  chunks={}  tokens={}  {} -> {}",
                        s.session_id, s.chunk_count, s.total_tokens, s.start_time, s.end_time
                    );
                }
            }
        }
        Commands::Archive(archive_args) => match archive_args.command {
            ArchiveCommands::Export(export_args) => {
                let opts = ExportOpts {
                    projects: if export_args.projects.is_empty() {
                        None
                    } else {
                        Some(export_args.projects)
                    },
                    redact_file_paths: export_args.redact_file_paths,
                    redact_code_blocks: export_args.redact_code_blocks,
                    omit_vectors: export_args.omit_vectors,
                    password: export_args.password,
                };
                let bytes = engine.export_archive(opts).await?;
                std::fs::write(&export_args.out, &bytes).map_err(|e| {
                    EngineError::StoreUnavailable(format!(
                        "writing archive to {}: {e}",
                        export_args.out.display()
                    ))
                })?;
                if cli.json {
                    println!("{}", json!({"written_bytes": bytes.len(), "path": export_args.out}));
                } else {
                    println!("wrote {} bytes to {}", bytes.len(), export_args.out.display());
                }
            }
            ArchiveCommands::Import(import_args) => {
                let mode = match import_args.mode.as_str() {
                    "replace" => ImportMode::Replace,
                    "merge" => ImportMode::Merge,
                    other => {
                        return Err(EngineError::InvalidInput(format!(
                            "invalid --mode {other:?}: expected \"replace\" or \"merge\""
                        )))
                    }
                };
                let bytes = std::fs::read(&import_args.input).map_err(|e| {
                    EngineError::StoreUnavailable(format!(
                        "reading archive from {}: {e}",
                        import_args.input.display()
                    ))
                })?;
                let opts = ImportOpts {
                    mode: Some(mode),
                    password: import_args.password,
                };
                let report = engine.import_archive(bytes, opts).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
                } else {
                    for warning in &report.warnings {
                        eprintln!("warning: {warning}");
                    }
                    println!(
                        "imported {} chunks, {} edges, {} clusters, {} vectors",
                        report.imported_chunks,
                        report.imported_edges,
                        report.imported_clusters,
                        report.imported_vectors
                    );
                }
            }
        },
    }
    Ok(())
}

fn resolve_window(args: &ReconstructArgs) -> Result<WindowSpec> {
    if let Some(session_id) = &args.session_id {
        return Ok(WindowSpec::SessionId(session_id.clone()));
    }
    if args.previous_session {
        let current = args
            .current_session_id
            .clone()
            .context("--previous-session requires --current-session-id")?;
        return Ok(WindowSpec::PreviousSession {
            current_session_id: current,
        });
    }
    if let Some(days_back) = args.days_back {
        return Ok(WindowSpec::DaysBack(days_back));
    }
    if let (Some(from), Some(to)) = (&args.from, &args.to) {
        return Ok(WindowSpec::Range {
            from: parse_rfc3339(from)?,
            to: parse_rfc3339(to)?,
        });
    }
    anyhow::bail!("reconstruct requires one of --session-id, --from/--to, --days-back, or --previous-session")
}

fn resolve_list_sessions_range(
    args: &ListSessionsArgs,
) -> Result<Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>> {
    if let Some(days_back) = args.days_back {
        let now = chrono::Utc::now();
        return Ok(Some((now - chrono::Duration::days(days_back), now)));
    }
    if let (Some(from), Some(to)) = (&args.from, &args.to) {
        return Ok(Some((parse_rfc3339(from)?, parse_rfc3339(to)?)));
    }
    Ok(None)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
