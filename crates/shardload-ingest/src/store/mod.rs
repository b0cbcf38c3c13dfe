//! Document store interface
//!
//! The pipeline only needs three capabilities from the target store: a
//! reachability check, a point existence lookup, and a bulk write that
//! reports one outcome per operation. [`ElasticsearchStore`] speaks HTTP to
//! an Elasticsearch-compatible cluster; [`MemoryStore`] keeps everything in
//! process.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{IndexOperation, OperationOutcome};

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchStore;
pub use memory::MemoryStore;

/// Target store for index operations
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Succeeds when the store accepts requests
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Whether a record with `id` already exists in `collection`
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Submit a chunk of operations
    ///
    /// On `Ok`, the outcomes are in the same order as `operations`. An `Err`
    /// means the request as a whole failed and no per-operation results are
    /// known.
    async fn bulk(&self, operations: &[IndexOperation]) -> Result<Vec<OperationOutcome>, StoreError>;
}
