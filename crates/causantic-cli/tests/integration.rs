//! End-to-end coverage of the engine API this CLI wraps: populate an
//! in-memory store through the same calls `main.rs` makes, then exercise
//! recall/reconstruct/archive round-trips.

use std::sync::Arc;

use causantic_core::archive::{ExportOpts, ImportMode, ImportOpts};
use causantic_core::clock::VectorClock;
use causantic_core::config::EngineConfig;
use causantic_core::embed::FakeEmbedder;
use causantic_core::model::{Chunk, ChunkId};
use causantic_core::{Engine, QueryOpts, RangeScope, ReconstructOpts, WindowSpec};
use chrono::{Duration, Utc};

fn sample_chunk(session_id: &str, project: &str, minute: i64, content: &str) -> Chunk {
    let start = Utc::now() - Duration::minutes(minute);
    let mut clock = VectorClock::new();
    clock.set("agent-a", minute.max(1) as u64);
    Chunk {
        id: ChunkId::new(),
        session_id: session_id.to_string(),
        project_slug: project.to_string(),
        project_path: None,
        turn_indices: vec![0],
        start_time: start,
        end_time: start,
        content: content.to_string(),
        approx_tokens: content.split_whitespace().count() as u32,
        agent_id: Some("agent-a".to_string()),
        vector_clock: clock,
        spawn_depth: 0,
        created_at: start,
    }
}

async fn seeded_engine() -> Engine {
    let engine = Engine::open_in_memory(Arc::new(FakeEmbedder::default()), EngineConfig::default())
        .expect("open in-memory engine");

    let chunks = [
        sample_chunk("s1", "demo", 30, "we discussed the token budget for the assembler"),
        sample_chunk("s1", "demo", 20, "then we moved on to the reciprocal rank fusion weights"),
        sample_chunk("s1", "demo", 10, "finally we settled on chain walk direction mapping"),
    ];
    for chunk in &chunks {
        engine.upsert_chunk(chunk.clone()).await.unwrap();
    }
    engine
}

#[tokio::test]
async fn recall_returns_chunks_from_the_seeded_session() {
    let engine = seeded_engine().await;
    let resp = engine
        .recall("reciprocal rank fusion weights", QueryOpts::default())
        .await
        .unwrap();
    assert!(!resp.chunks.is_empty());
    assert!(!resp.degraded);
}

#[tokio::test]
async fn search_biases_keyword_matches() {
    let engine = seeded_engine().await;
    let opts = QueryOpts {
        range: RangeScope::Short,
        ..QueryOpts::default()
    };
    let resp = engine.search("chain walk direction", opts).await.unwrap();
    assert!(resp.chunks.iter().any(|c| c.preview.contains("chain walk")));
}

#[tokio::test]
async fn reconstruct_by_session_id_is_chronological() {
    let engine = seeded_engine().await;
    let sessions = engine.list_sessions("demo", None).await.unwrap();
    assert_eq!(sessions.len(), 1);
    let session_id = sessions[0].session_id.clone();

    let result = engine
        .reconstruct(ReconstructOpts {
            window: WindowSpec::SessionId(session_id),
            project: "demo".to_string(),
            max_tokens: 10_000,
            keep_newest: true,
        })
        .await
        .unwrap();

    assert_eq!(result.chunks.len(), 3);
    assert!(result.chunks.windows(2).all(|w| w[0].start_time <= w[1].start_time));
}

#[tokio::test]
async fn reconstruct_missing_session_id_is_empty_not_an_error() {
    let engine = seeded_engine().await;
    let result = engine
        .reconstruct(ReconstructOpts {
            window: WindowSpec::SessionId("does-not-exist".to_string()),
            project: "demo".to_string(),
            max_tokens: 10_000,
            keep_newest: true,
        })
        .await
        .unwrap();
    assert!(result.chunks.is_empty());
}

#[tokio::test]
async fn list_projects_reports_the_seeded_project() {
    let engine = seeded_engine().await;
    let projects = engine.list_projects().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].slug, "demo");
    assert_eq!(projects[0].chunk_count, 3);
}

#[tokio::test]
async fn export_then_import_round_trips_into_a_fresh_store() {
    let source = seeded_engine().await;
    let bytes = source
        .export_archive(ExportOpts::default())
        .await
        .expect("export archive");

    let destination =
        Engine::open_in_memory(Arc::new(FakeEmbedder::default()), EngineConfig::default()).unwrap();
    let report = destination
        .import_archive(bytes, ImportOpts::default())
        .await
        .expect("import archive");

    assert_eq!(report.imported_chunks, 3);
    assert!(report.warnings.is_empty());

    let projects = destination.list_projects().await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].chunk_count, 3);
}

#[tokio::test]
async fn encrypted_archive_rejects_wrong_password() {
    let source = seeded_engine().await;
    let bytes = source
        .export_archive(ExportOpts {
            password: Some("correct horse".to_string()),
            ..ExportOpts::default()
        })
        .await
        .unwrap();

    let destination =
        Engine::open_in_memory(Arc::new(FakeEmbedder::default()), EngineConfig::default()).unwrap();
    let result = destination
        .import_archive(
            bytes,
            ImportOpts {
                mode: Some(ImportMode::Merge),
                password: Some("wrong password".to_string()),
            },
        )
        .await;
    assert!(result.is_err());
}
