//! End-to-end pipeline tests against the in-process store
//!
//! These cover the run-level guarantees:
//! - every submitted document ends as exactly one success or failure
//! - deduplication skips ids already in the store
//! - malformed lines and unreadable shards never stop the run
//! - chunking and bounded parallelism
//! - the stop signal and fatal startup errors

mod common;

use common::*;
use proptest::prelude::*;
use serde_json::json;
use shardload_ingest::config::LookupFailurePolicy;
use shardload_ingest::{IngestError, MemoryStore, RunStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn two_shard_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_shard(dir.path(), "shard-a.json.gz", &doc_lines(&["1", "2", "3"]));
    write_shard(dir.path(), "shard-b.json.gz", &doc_lines(&["4", "5"]));
    dir
}

fn store_with_existing(id: &str) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new().with_document(COLLECTION, id, document(json!({"id": id}))))
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_dedup_skips_existing_document() {
    let dir = two_shard_dir();
    let store = store_with_existing("5");
    let mut config = test_config(dir.path());
    config.ingest.dedup = true;

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.tally.skipped, 1);
    assert_eq!(report.tally.succeeded, 4);
    assert_eq!(report.tally.failed, 0);
    assert_eq!(report.tally.submitted, 4);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(store.exists_calls(), 5);
    assert_eq!(store.len(COLLECTION), 5);
}

#[tokio::test]
async fn test_without_dedup_everything_is_indexed() {
    let dir = two_shard_dir();
    let store = store_with_existing("5");

    let report = pipeline(test_config(dir.path()), &store).run().await.unwrap();

    assert_eq!(report.tally.skipped, 0);
    assert_eq!(report.tally.succeeded, 5);
    assert_eq!(report.tally.failed, 0);
    assert_eq!(store.exists_calls(), 0);
    // The pre-existing record was overwritten with the shard payload
    assert_eq!(store.get(COLLECTION, "5").unwrap()["title"], "Article 5");
}

#[tokio::test]
async fn test_rerun_with_dedup_is_idempotent() {
    let dir = numbered_shards(23, 10);
    let store = Arc::new(MemoryStore::new());

    let first = pipeline(test_config(dir.path()), &store).run().await.unwrap();
    assert_eq!(first.tally.succeeded, 23);
    let bulk_calls_after_first = store.bulk_calls();

    let mut config = test_config(dir.path());
    config.ingest.dedup = true;
    let second = pipeline(config, &store).run().await.unwrap();

    assert_eq!(second.tally.skipped, first.tally.submitted);
    assert_eq!(second.tally.succeeded, 0);
    assert_eq!(second.tally.submitted, 0);
    assert_eq!(store.bulk_calls(), bulk_calls_after_first);
    assert_eq!(second.status, RunStatus::Success);
}

// ============================================================================
// Per-document and per-line failures
// ============================================================================

#[tokio::test]
async fn test_missing_identifier_counts_as_failed() {
    let dir = TempDir::new().unwrap();
    let lines = vec![
        doc_line("a"),
        json!({"title": "no id here"}).to_string(),
        doc_line("b"),
    ];
    write_shard(dir.path(), "part.json.gz", &lines);
    let store = Arc::new(MemoryStore::new());

    let report = pipeline(test_config(dir.path()), &store).run().await.unwrap();

    assert_eq!(report.tally.failed, 1);
    assert_eq!(report.tally.succeeded, 2);
    assert_eq!(report.tally.submitted, 3);
    assert_eq!(report.failure_reasons.get("missing_identifier"), Some(&1));
    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.exit_code(), 2);
    // Only the two identified documents reached the store
    assert_eq!(store.bulk_sizes().iter().sum::<usize>(), 2);
}

#[tokio::test]
async fn test_malformed_line_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut lines = doc_lines(&["1", "2", "3", "4"]);
    lines.insert(2, "{\"id\": \"broken\", ".to_string());
    write_shard(dir.path(), "part.json.gz", &lines);
    let store = Arc::new(MemoryStore::new());

    let report = pipeline(test_config(dir.path()), &store).run().await.unwrap();

    assert_eq!(report.tally.malformed, 1);
    assert_eq!(report.tally.succeeded, 4);
    assert_eq!(report.tally.failed, 0);
    assert_eq!(report.status, RunStatus::Success);
}

#[tokio::test]
async fn test_unreadable_shard_does_not_stop_run() {
    let dir = two_shard_dir();
    std::fs::write(dir.path().join("shard-c.json.gz"), b"definitely not gzip").unwrap();
    let store = Arc::new(MemoryStore::new());

    let report = pipeline(test_config(dir.path()), &store).run().await.unwrap();

    assert_eq!(report.tally.shards_total, 3);
    assert_eq!(report.tally.shards_failed, 1);
    assert_eq!(report.tally.succeeded, 5);
    assert_eq!(report.status, RunStatus::Success);
}

#[tokio::test]
async fn test_truncated_shard_keeps_leading_documents() {
    let dir = two_shard_dir();
    let ids: Vec<String> = (0..2000).map(|i| format!("cut-{:05}", i)).collect();
    let lines: Vec<String> = ids.iter().map(|id| doc_line(id)).collect();
    let cut = dir.path().join("shard-c.json.gz");
    write_shard(dir.path(), "shard-c.json.gz", &lines);
    let bytes = std::fs::read(&cut).unwrap();
    std::fs::write(&cut, &bytes[..bytes.len() / 2]).unwrap();
    let store = Arc::new(MemoryStore::new());

    let report = pipeline(test_config(dir.path()), &store).run().await.unwrap();

    assert_eq!(report.tally.shards_total, 3);
    assert_eq!(report.tally.shards_failed, 1);
    assert_eq!(report.tally.failed, 0);
    for id in ["1", "2", "3", "4", "5", "cut-00000"] {
        assert!(store.contains(COLLECTION, id), "{} was not indexed", id);
    }
    let leading = report.tally.succeeded - 5;
    assert!(leading > 0 && leading < 2000, "indexed {} from the cut shard", leading);
    assert!(!store.contains(COLLECTION, "cut-01999"));
    assert_eq!(report.status, RunStatus::Success);
}

#[tokio::test]
async fn test_rejected_operations_do_not_affect_siblings() {
    let dir = two_shard_dir();
    let store = Arc::new(MemoryStore::new().reject_id("2").reject_id("4"));
    let mut config = test_config(dir.path());
    config.ingest.chunk_size = 2;
    config.ingest.concurrency = 2;

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.tally.succeeded, 3);
    assert_eq!(report.tally.failed, 2);
    assert_eq!(report.tally.submitted, report.tally.succeeded + report.tally.failed);
    assert_eq!(report.failure_reasons.get("version_conflict"), Some(&2));
    assert!(store.contains(COLLECTION, "3"));
    assert!(!store.contains(COLLECTION, "2"));
    assert_eq!(report.status, RunStatus::PartialFailure);
}

#[tokio::test]
async fn test_integer_ids_and_custom_id_field() {
    let dir = TempDir::new().unwrap();
    let lines = vec![
        json!({"doc_key": 17, "title": "a"}).to_string(),
        json!({"doc_key": "x-9", "title": "b"}).to_string(),
    ];
    write_shard(dir.path(), "part.json.gz", &lines);
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config(dir.path());
    config.ingest.id_field = "doc_key".to_string();

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.tally.succeeded, 2);
    assert!(store.contains(COLLECTION, "17"));
    assert!(store.contains(COLLECTION, "x-9"));
}

// ============================================================================
// Chunking and concurrency
// ============================================================================

#[tokio::test]
async fn test_parallel_mode_bounds_in_flight_chunks() {
    let dir = numbered_shards(40, 7);
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(15)));
    let mut config = test_config(dir.path());
    config.ingest.chunk_size = 2;
    config.ingest.concurrency = 4;

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.tally.succeeded, 40);
    assert_eq!(report.tally.chunks, 20);
    assert!(store.max_in_flight() <= 4, "saw {} in flight", store.max_in_flight());
    assert!(store.max_in_flight() > 1);
}

#[tokio::test]
async fn test_sequential_mode_one_chunk_at_a_time() {
    let dir = numbered_shards(12, 5);
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(5)));
    let mut config = test_config(dir.path());
    config.ingest.chunk_size = 5;

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.tally.succeeded, 12);
    assert_eq!(store.bulk_sizes(), vec![5, 5, 2]);
    assert_eq!(store.max_in_flight(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_chunk_count_is_ceiling(docs in 0usize..60, chunk_size in 1usize..12, per_shard in 1usize..20) {
        let dir = numbered_shards(docs, per_shard);
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config(dir.path());
        config.ingest.chunk_size = chunk_size;

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let report = runtime.block_on(pipeline(config, &store).run()).unwrap();

        prop_assert_eq!(store.bulk_calls(), docs.div_ceil(chunk_size));
        prop_assert_eq!(report.tally.succeeded as usize, docs);
        prop_assert!(store.bulk_sizes().iter().all(|&n| n <= chunk_size));
    }
}

// ============================================================================
// Stop signal
// ============================================================================

#[tokio::test]
async fn test_consecutive_transport_failures_abort_run() {
    let dir = numbered_shards(10, 10);
    let store = Arc::new(MemoryStore::new());
    store.set_fail_bulk(true);
    let mut config = test_config(dir.path());
    config.ingest.chunk_size = 1;
    config.ingest.max_consecutive_transport_failures = 3;

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(store.bulk_calls(), 3);
    assert_eq!(report.tally.failed, 3);
    assert_eq!(report.tally.submitted, 3);
    assert_eq!(report.failure_reasons.get("transport"), Some(&3));
}

#[tokio::test]
async fn test_transport_stop_after_last_document_is_partial_failure() {
    let dir = numbered_shards(3, 3);
    let store = Arc::new(MemoryStore::new());
    store.set_fail_bulk(true);
    let mut config = test_config(dir.path());
    config.ingest.chunk_size = 1;
    config.ingest.max_consecutive_transport_failures = 3;
    let pipeline = pipeline(config, &store);

    let report = pipeline.run().await.unwrap();

    // The stop came only after every document had been sent
    assert!(pipeline.cancellation_token().is_cancelled());
    assert_eq!(store.bulk_calls(), 3);
    assert_eq!(report.tally.submitted, 3);
    assert_eq!(report.tally.failed, 3);
    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn test_external_stop_before_run() {
    let dir = numbered_shards(10, 5);
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(test_config(dir.path()), &store);
    pipeline.cancellation_token().cancel();

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(store.bulk_calls(), 0);
    assert_eq!(report.tally.submitted, 0);
}

#[tokio::test]
async fn test_stop_lets_in_flight_chunks_finish() {
    let dir = numbered_shards(200, 50);
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(40)));
    let mut config = test_config(dir.path());
    config.ingest.chunk_size = 10;
    config.ingest.concurrency = 2;
    let pipeline = pipeline(config, &store);

    let token = pipeline.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
    });
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.tally.submitted < 200);
    // Every chunk that reached the store was fully accounted for
    let sent: usize = store.bulk_sizes().iter().sum();
    assert_eq!(report.tally.submitted as usize, sent);
    assert_eq!(store.len(COLLECTION), sent);
}

#[tokio::test]
async fn test_lookup_failure_assumes_missing_by_default() {
    let dir = two_shard_dir();
    let store = Arc::new(MemoryStore::new());
    store.set_fail_lookups(true);
    let mut config = test_config(dir.path());
    config.ingest.dedup = true;

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.tally.lookup_failures, 5);
    assert_eq!(report.tally.succeeded, 5);
    assert_eq!(report.status, RunStatus::Success);
}

#[tokio::test]
async fn test_lookup_failure_abort_policy() {
    let dir = numbered_shards(2000, 500);
    let store = Arc::new(MemoryStore::new());
    store.set_fail_lookups(true);
    let mut config = test_config(dir.path());
    config.ingest.dedup = true;
    config.ingest.on_lookup_failure = LookupFailurePolicy::Abort;
    config.ingest.queue_capacity = 4;

    let report = pipeline(config, &store).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.tally.submitted < 2000);
    assert!(report.tally.lookup_failures >= 1);
    assert!(report.tally.failed >= 1);
    assert_eq!(report.failure_reasons.get("lookup_failed").copied(), Some(report.tally.failed));
    assert!(store.is_empty(COLLECTION));
}

// ============================================================================
// Fatal startup errors
// ============================================================================

#[tokio::test]
async fn test_unreachable_store_is_fatal() {
    let dir = two_shard_dir();
    let store = Arc::new(MemoryStore::new());
    store.set_unreachable(true);

    let err = pipeline(test_config(dir.path()), &store).run().await.unwrap_err();

    assert!(matches!(err, IngestError::StoreUnreachable(_)));
    assert!(err.is_fatal());
    assert_eq!(store.bulk_calls(), 0);
}

#[tokio::test]
async fn test_missing_directory_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let err = pipeline(test_config(&dir.path().join("nope")), &store)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::DirectoryUnreadable { .. }));
}

#[tokio::test]
async fn test_empty_directory_is_success() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a shard").unwrap();
    let store = Arc::new(MemoryStore::new());

    let report = pipeline(test_config(dir.path()), &store).run().await.unwrap();

    assert_eq!(report.tally.shards_total, 0);
    assert_eq!(report.tally.submitted, 0);
    assert_eq!(report.status, RunStatus::Success);
}

// ============================================================================
// Scanning options
// ============================================================================

#[tokio::test]
async fn test_recursive_scan_and_precount() {
    let dir = TempDir::new().unwrap();
    write_shard(dir.path(), "top.json.gz", &doc_lines(&["1"]));
    write_shard(dir.path(), "nested/deeper/inner.json.gz", &doc_lines(&["2", "3"]));
    write_shard(dir.path(), "nested/ignored.ndjson.gz", &doc_lines(&["4"]));
    let store = Arc::new(MemoryStore::new());

    let flat = pipeline(test_config(dir.path()), &store).run().await.unwrap();
    assert_eq!(flat.tally.succeeded, 1);

    let mut config = test_config(dir.path());
    config.data_files.recursive = true;
    config.ingest.precount = true;
    config.ingest.progress = true;
    let deep = pipeline(config, &store).run().await.unwrap();

    assert_eq!(deep.tally.shards_total, 2);
    assert_eq!(deep.tally.succeeded, 3);
    assert!(!store.contains(COLLECTION, "4"));
}
