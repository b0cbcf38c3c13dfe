//! In-process document store
//!
//! Holds documents in memory and can be told to misbehave: reject specific
//! ids, fail lookups, fail bulk requests, or go away entirely. It also keeps
//! call statistics, including the peak number of concurrent bulk requests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::DocumentStore;
use crate::error::StoreError;
use crate::models::{Document, IndexOperation, OperationOutcome};

const ENDPOINT: &str = "memory://";

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, HashMap<String, Document>>>,
    rejected_ids: Mutex<HashSet<String>>,
    bulk_sizes: Mutex<Vec<usize>>,
    latency: Option<Duration>,
    unreachable: AtomicBool,
    fail_bulk: AtomicBool,
    fail_lookups: AtomicBool,
    bulk_calls: AtomicUsize,
    exists_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decrements the in-flight counter however the bulk call ends
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record, as if indexed by an earlier run
    pub fn with_document(self, collection: &str, id: &str, document: Document) -> Self {
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        self
    }

    /// Delay every bulk call, to make overlapping calls observable
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject every operation for `id` with a conflict
    pub fn reject_id(self, id: &str) -> Self {
        lock(&self.rejected_ids).insert(id.to_string());
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_fail_bulk(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, collection: &str, id: &str) -> bool {
        lock(&self.collections)
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id))
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        lock(&self.collections)
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Number of records in `collection`
    pub fn len(&self, collection: &str) -> usize {
        lock(&self.collections).get(collection).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Highest number of bulk calls observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Operation count of every bulk call, in call order
    pub fn bulk_sizes(&self) -> Vec<usize> {
        lock(&self.bulk_sizes).clone()
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable {
                endpoint: ENDPOINT.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Http {
                status: 503,
                body: "lookup unavailable".to_string(),
            });
        }
        Ok(self.contains(collection, id))
    }

    async fn bulk(&self, operations: &[IndexOperation]) -> Result<Vec<OperationOutcome>, StoreError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.bulk_sizes).push(operations.len());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.check_reachable()?;
        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset by peer".to_string()));
        }

        let rejected = lock(&self.rejected_ids).clone();
        let mut collections = lock(&self.collections);
        let outcomes = operations
            .iter()
            .map(|op| {
                if rejected.contains(&op.id) {
                    OperationOutcome::rejected(&op.id, "version_conflict: document is locked")
                } else {
                    collections
                        .entry(op.collection.clone())
                        .or_default()
                        .insert(op.id.clone(), op.payload.clone());
                    OperationOutcome::indexed(&op.id)
                }
            })
            .collect();

        Ok(outcomes)
    }
}
