//! Integration tests for the loglens ingestion pipeline
//!
//! These tests use `tests/fixtures/access.log` to verify the end-to-end flow
//! from upload through the worker to summary and event queries.

use loglens_core::config::Config;
use loglens_core::db::Database;
use loglens_core::ingest::{parse_entry, Aggregator};
use loglens_core::types::{EventQuery, JobStatus, LogEntry, SummaryState};
use loglens_core::{
    Analyzer, BlobStore, LocalBlobStore, LogService, Outcome, SqliteWorkQueue, WorkQueue, Worker,
};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn fixture_bytes() -> Vec<u8> {
    std::fs::read(fixture_path("access.log")).expect("fixture should exist")
}

struct Pipeline {
    _dir: TempDir,
    db: Arc<Database>,
    blobs: Arc<LocalBlobStore>,
    queue: Arc<SqliteWorkQueue>,
    service: LogService,
    worker: Worker,
}

/// Wire every collaborator the way the binaries do, on a file-backed database
fn pipeline(config: Config) -> Pipeline {
    loglens_core::logging::init_test();

    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("loglens.db")).unwrap());
    db.migrate().unwrap();
    let blobs = Arc::new(LocalBlobStore::open(dir.path().join("blobs")).unwrap());
    let queue = Arc::new(SqliteWorkQueue::new(db.clone()));

    let service = LogService::new(
        db.clone(),
        blobs.clone(),
        db.clone(),
        queue.clone(),
        config.query.clone(),
    );
    let analyzer = Analyzer::new(db.clone(), blobs.clone(), db.clone(), &config);
    let worker = Worker::new(queue.clone(), analyzer, config.worker.clone());

    Pipeline {
        _dir: dir,
        db,
        blobs,
        queue,
        service,
        worker,
    }
}

// ============================================
// Aggregation
// ============================================

#[test]
fn test_fixture_aggregates() {
    let bytes = fixture_bytes();
    let mut events: Vec<LogEntry> = Vec::new();
    let mut sink = |batch: &[LogEntry]| -> loglens_core::Result<()> {
        events.extend_from_slice(batch);
        Ok(())
    };

    let summary = Aggregator::new(3)
        .run("fixture", bytes.as_slice(), &mut sink)
        .expect("aggregation should succeed");

    assert_eq!(summary.total_lines, 10);
    assert_eq!(summary.parsed_lines(), 7);
    assert_eq!(events.len(), 7);
    assert_eq!(summary.content_digest, hex::encode(Sha256::digest(&bytes)));

    assert_eq!(summary.status_counts.get(&200), Some(&3));
    assert_eq!(summary.status_counts.get(&302), Some(&1));
    assert_eq!(summary.status_counts.get(&404), Some(&1));
    assert_eq!(summary.status_counts.get(&500), Some(&1));
    assert_eq!(summary.status_counts.get(&204), Some(&1));

    assert_eq!(summary.unique_client_count, 3);
    let clients: Vec<(&str, u64)> = summary
        .top_clients
        .iter()
        .map(|e| (e.key.as_str(), e.count))
        .collect();
    assert_eq!(
        clients,
        vec![("192.168.1.10", 3), ("192.168.1.11", 2), ("10.0.0.5", 2)]
    );
    assert_eq!(summary.top_paths[0].key, "/index.html");
    assert_eq!(summary.top_paths[0].count, 2);

    let minutes: Vec<(&str, u64)> = summary
        .errors_over_time
        .iter()
        .map(|m| (m.minute.as_str(), m.count))
        .collect();
    assert_eq!(
        minutes,
        vec![
            ("2025-09-27T19:34", 3),
            ("2025-09-27T19:35", 2),
            ("2025-09-27T19:36", 2)
        ]
    );
}

#[test]
fn test_crlf_input_parses_like_lf() {
    let lf = fixture_bytes();
    let crlf: Vec<u8> = String::from_utf8(lf.clone())
        .unwrap()
        .replace('\n', "\r\n")
        .into_bytes();

    let mut discard = |_: &[LogEntry]| -> loglens_core::Result<()> { Ok(()) };
    let from_lf = Aggregator::default()
        .run("a", lf.as_slice(), &mut discard)
        .unwrap();
    let from_crlf = Aggregator::default()
        .run("b", crlf.as_slice(), &mut discard)
        .unwrap();

    assert_eq!(from_lf.status_counts, from_crlf.status_counts);
    assert_eq!(from_lf.total_lines, from_crlf.total_lines);
    assert_ne!(from_lf.content_digest, from_crlf.content_digest);
}

#[test]
fn test_parse_entry_normalizes_to_utc() {
    let line = std::str::from_utf8(&fixture_bytes())
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string();
    let entry = parse_entry(&line).expect("first fixture line should parse");
    assert_eq!(entry.timestamp.to_rfc3339(), "2025-09-27T19:34:56+00:00");
    assert_eq!(entry.client, "192.168.1.10");
    assert_eq!(entry.bytes, 1024);
}

// ============================================
// Upload -> worker -> queries
// ============================================

#[tokio::test]
async fn test_upload_is_analyzed_by_worker() {
    let p = pipeline(Config::default());
    let reg = p
        .service
        .register_upload("alice", "access.log", &fixture_bytes())
        .unwrap();

    assert!(matches!(
        p.service.summary_state(&reg.subject_id).unwrap(),
        SummaryState::Pending { .. }
    ));

    let outcomes = p.worker.poll_once().await.unwrap();
    assert_eq!(outcomes, vec![Outcome::Completed]);
    assert_eq!(p.queue.depth().unwrap(), 0);

    let summary = match p.service.summary_state(&reg.subject_id).unwrap() {
        SummaryState::Ready(summary) => summary,
        other => panic!("expected a summary, got {:?}", other),
    };
    let record = p.service.get_log(&reg.subject_id).unwrap().unwrap();
    assert_eq!(record.digest.as_deref(), Some(summary.content_digest.as_str()));
    assert_eq!(summary.total_lines, 10);

    let job = p.service.job(&reg.job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn test_event_keys_and_pagination() {
    let mut config = Config::default();
    config.query.store_page_size = 2;
    let p = pipeline(config);

    let reg = p
        .service
        .register_upload("alice", "access.log", &fixture_bytes())
        .unwrap();
    p.worker.poll_once().await.unwrap();

    let keys: Vec<String> = (1..=3)
        .flat_map(|page| {
            p.service
                .events(
                    &reg.subject_id,
                    &EventQuery {
                        page,
                        limit: 3,
                        ..Default::default()
                    },
                )
                .unwrap()
                .items
        })
        .map(|e| loglens_core::types::format_ordering_key(&e.ordering_key))
        .collect();

    assert_eq!(
        keys,
        vec![
            "2025-09-27T19:34:56.000Z",
            "2025-09-27T19:34:56.001Z",
            "2025-09-27T19:34:57.000Z",
            "2025-09-27T19:35:02.000Z",
            "2025-09-27T19:35:59.000Z",
            "2025-09-27T19:36:10.000Z",
            "2025-09-27T19:36:10.001Z",
        ]
    );

    let server_errors = p
        .service
        .events(
            &reg.subject_id,
            &EventQuery {
                status: Some(500),
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(server_errors.items.len(), 1);
    assert_eq!(server_errors.items[0].path, "/api/items?page=2");
    assert!(server_errors.exhausted);
}

#[tokio::test]
async fn test_missing_blob_is_retried_after_repair() {
    let mut config = Config::default();
    config.worker.visibility_timeout_secs = 1;
    let p = pipeline(config);

    let reg = p
        .service
        .register_upload("alice", "access.log", &fixture_bytes())
        .unwrap();
    let key = p.service.get_log(&reg.subject_id).unwrap().unwrap().storage_key;
    p.blobs.delete(&key).unwrap();

    let outcomes = p.worker.poll_once().await.unwrap();
    assert!(matches!(outcomes.as_slice(), [Outcome::Failed(_)]));
    let failed = p.service.job(&reg.job_id).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Error);
    assert!(failed.error.unwrap().contains("blob not found"));
    assert!(p.db.get_summary(&reg.subject_id).unwrap().is_none());

    // Restore the blob and let the lease lapse
    p.blobs.put(&key, &fixture_bytes()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let outcomes = p.worker.poll_once().await.unwrap();
    assert_eq!(outcomes, vec![Outcome::Completed]);
    let done = p.service.job(&reg.job_id).unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.attempts, 2);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let p = pipeline(Config::default());
    let reg = p
        .service
        .register_upload("alice", "access.log", &fixture_bytes())
        .unwrap();
    p.worker.poll_once().await.unwrap();
    let key = p.service.get_log(&reg.subject_id).unwrap().unwrap().storage_key;

    let removed = p.service.delete_log(&reg.subject_id).unwrap();
    assert_eq!(removed, 7);

    assert!(matches!(
        p.service.summary_state(&reg.subject_id).unwrap(),
        SummaryState::NotFound
    ));
    assert_eq!(p.db.count_events(&reg.subject_id).unwrap(), 0);
    assert!(p.blobs.fetch(&key).is_err());

    // Job history survives for auditing
    assert_eq!(p.service.job_history(&reg.subject_id, 10).unwrap().len(), 1);
}

#[test]
fn test_queue_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loglens.db");

    {
        let db = Arc::new(Database::open(&path).unwrap());
        db.migrate().unwrap();
        SqliteWorkQueue::new(db)
            .enqueue(&loglens_core::WorkUnit {
                job_id: "j1".to_string(),
                subject_id: "s1".to_string(),
            })
            .unwrap();
    }

    let db = Arc::new(Database::open(&path).unwrap());
    db.migrate().unwrap();
    let delivered = SqliteWorkQueue::new(db).receive(5, 30).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].unit.job_id, "j1");
}
