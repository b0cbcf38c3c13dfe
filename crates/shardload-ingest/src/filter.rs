//! Existence filter
//!
//! Opt-in stage that looks each document id up in the store before it is
//! translated. Every document costs one store round-trip, so enabling it
//! trades throughput for not rewriting records that are already indexed.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::LookupFailurePolicy;
use crate::error::IngestError;
use crate::progress::OutcomeAggregator;
use crate::store::DocumentStore;

/// What to do with a document after its lookup
#[derive(Debug)]
pub enum FilterVerdict {
    /// Not in the store, or the lookup failed and the policy allows indexing
    Submit,
    /// Already present
    Skip,
    /// Lookup failed under the `abort` policy
    Fail(IngestError),
}

pub struct ExistenceFilter {
    store: Arc<dyn DocumentStore>,
    collection: String,
    policy: LookupFailurePolicy,
    aggregator: Arc<OutcomeAggregator>,
    cancel: CancellationToken,
}

impl ExistenceFilter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        policy: LookupFailurePolicy,
        aggregator: Arc<OutcomeAggregator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            policy,
            aggregator,
            cancel,
        }
    }

    /// Look `id` up and decide whether it still needs indexing
    pub async fn check(&self, id: &str) -> FilterVerdict {
        match self.store.exists(&self.collection, id).await {
            Ok(true) => {
                debug!(id, "Document already indexed, skipping");
                FilterVerdict::Skip
            }
            Ok(false) => FilterVerdict::Submit,
            Err(e) => {
                self.aggregator.record_lookup_failure();
                match self.policy {
                    LookupFailurePolicy::AssumeMissing => {
                        warn!(id, error = %e, "Existence check failed, indexing anyway");
                        FilterVerdict::Submit
                    }
                    LookupFailurePolicy::Abort => {
                        error!(id, error = %e, "Existence check failed, stopping the run");
                        self.cancel.cancel();
                        FilterVerdict::Fail(IngestError::LookupFailed {
                            id: id.to_string(),
                            source: e,
                        })
                    }
                }
            }
        }
    }
}
