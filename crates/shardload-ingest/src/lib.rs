//! Shardload Ingest Library
//!
//! Streams gzip-compressed newline-delimited JSON shards into a document
//! store in bulk, counting every document's outcome along the way.
//!
//! # Pipeline
//!
//! - **Scanner**: finds shard files in the input directory
//! - **Decoder**: decompresses and parses one line at a time
//! - **Existence Filter**: optional per-document lookup that skips ids
//!   already in the store
//! - **Translator**: turns documents into index operations
//! - **Submitter**: sends operations in chunks, sequentially or with
//!   bounded parallelism
//! - **Aggregator**: tallies outcomes and drives the progress bar
//!
//! # Example
//!
//! ```no_run
//! use shardload_ingest::{ElasticsearchStore, IngestConfig, IngestPipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load("config.yaml")?;
//!     let store = ElasticsearchStore::new(&config.elasticsearch)?;
//!     let report = IngestPipeline::new(config, Arc::new(store)).run().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod store;
pub mod submitter;
pub mod translator;

pub use config::IngestConfig;
pub use error::{IngestError, Result, StoreError};
pub use pipeline::IngestPipeline;
pub use progress::OutcomeTally;
pub use report::{RunReport, RunStatus};
pub use store::{DocumentStore, ElasticsearchStore, MemoryStore};
pub use submitter::SubmissionMode;
