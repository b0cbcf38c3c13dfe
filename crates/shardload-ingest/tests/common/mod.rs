//! Shared fixtures for shardload integration tests
//!
//! Builds shard directories on disk and pipelines over an in-process store.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use shardload_ingest::models::Document;
use shardload_ingest::{IngestConfig, IngestPipeline, MemoryStore};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const COLLECTION: &str = "articles";

/// Write `lines` into a gzip shard, one per line
pub fn write_shard(dir: &Path, name: &str, lines: &[String]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::fast());
    for line in lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap();
}

/// JSON line for a document with the given id
pub fn doc_line(id: &str) -> String {
    serde_json::json!({"id": id, "title": format!("Article {}", id), "body": "lorem ipsum"}).to_string()
}

pub fn doc_lines(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| doc_line(id)).collect()
}

/// A directory with `count` documents spread over shards of `per_shard`
pub fn numbered_shards(count: usize, per_shard: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = (0..count).map(|i| format!("doc-{:05}", i)).collect();
    for (n, batch) in ids.chunks(per_shard.max(1)).enumerate() {
        let lines: Vec<String> = batch.iter().map(|id| doc_line(id)).collect();
        write_shard(dir.path(), &format!("part-{:04}.json.gz", n), &lines);
    }
    dir
}

pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("test documents must be objects"),
    }
}

/// Configuration pointing at `dir` with progress output off
pub fn test_config(dir: &Path) -> IngestConfig {
    let mut config = IngestConfig::new("http://localhost:9200", COLLECTION, dir);
    config.ingest.progress = false;
    config
}

pub fn pipeline(config: IngestConfig, store: &Arc<MemoryStore>) -> IngestPipeline {
    IngestPipeline::new(config, store.clone())
}
