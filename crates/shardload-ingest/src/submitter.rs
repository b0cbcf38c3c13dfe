//! Bulk submission of operation chunks
//!
//! A chunk is sent as one bulk request. Every operation in it ends up in the
//! tally exactly once: as the outcome the store reported, or as a failure
//! when the request itself fails or the store leaves an operation out.

use futures::{Stream, StreamExt};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::models::{IndexOperation, OperationOutcome};
use crate::progress::OutcomeAggregator;
use crate::store::DocumentStore;

/// How chunks are dispatched to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// One chunk at a time, in stream order
    Sequential,
    /// Up to `width` chunks in flight; completion order is unspecified
    Parallel { width: NonZeroUsize },
}

impl SubmissionMode {
    /// `concurrency` of 0 or 1 means sequential
    pub fn from_concurrency(concurrency: usize) -> Self {
        match NonZeroUsize::new(concurrency) {
            Some(width) if width.get() > 1 => Self::Parallel { width },
            _ => Self::Sequential,
        }
    }

    /// Maximum chunks in flight
    pub fn width(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { width } => width.get(),
        }
    }
}

impl std::fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel { width } => write!(f, "parallel({})", width),
        }
    }
}

/// Result of submitting one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSummary {
    pub operations: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the bulk request as a whole failed
    pub transport_error: Option<StoreError>,
}

/// Sends chunks to the store and feeds outcomes to the aggregator
pub struct BulkSubmitter {
    store: Arc<dyn DocumentStore>,
    aggregator: Arc<OutcomeAggregator>,
    cancel: CancellationToken,
    consecutive_failures: AtomicU32,
    max_consecutive_failures: u32,
}

impl BulkSubmitter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        aggregator: Arc<OutcomeAggregator>,
        cancel: CancellationToken,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            store,
            aggregator,
            cancel,
            consecutive_failures: AtomicU32::new(0),
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// Submit one chunk and record an outcome for each of its operations
    pub async fn submit_chunk(&self, chunk: Vec<IndexOperation>) -> ChunkSummary {
        if chunk.is_empty() {
            return ChunkSummary::default();
        }
        self.aggregator.record_chunk();

        match self.store.bulk(&chunk).await {
            Ok(outcomes) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                let outcomes = normalize_outcomes(&chunk, outcomes);
                let mut summary = ChunkSummary {
                    operations: chunk.len(),
                    ..ChunkSummary::default()
                };
                for outcome in &outcomes {
                    self.aggregator.record_outcome(outcome);
                    if outcome.is_success() {
                        summary.succeeded += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                debug!(
                    operations = summary.operations,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Chunk submitted"
                );
                summary
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    error = %e,
                    operations = chunk.len(),
                    consecutive_failures = failures,
                    "Bulk request failed, marking chunk as failed"
                );
                let category = failure_category(&e);
                for _ in &chunk {
                    self.aggregator.record_failure(category);
                }
                if failures >= self.max_consecutive_failures && !self.cancel.is_cancelled() {
                    warn!(
                        consecutive_failures = failures,
                        "Too many consecutive transport failures, stopping new submissions"
                    );
                    self.cancel.cancel();
                }
                ChunkSummary {
                    operations: chunk.len(),
                    succeeded: 0,
                    failed: chunk.len(),
                    transport_error: Some(e),
                }
            }
        }
    }

    /// Submit every chunk from `chunks` according to `mode`
    ///
    /// Returns once the stream is exhausted and every chunk already started
    /// has finished. Callers stop new submissions by ending the stream.
    pub async fn drive<S>(&self, chunks: S, mode: SubmissionMode)
    where
        S: Stream<Item = Vec<IndexOperation>> + Send,
    {
        match mode {
            SubmissionMode::Sequential => {
                chunks
                    .then(|chunk| self.submit_chunk(chunk))
                    .for_each(|_| async {})
                    .await;
            }
            SubmissionMode::Parallel { width } => {
                chunks
                    .map(|chunk| self.submit_chunk(chunk))
                    .buffer_unordered(width.get())
                    .for_each(|_| async {})
                    .await;
            }
        }
    }
}

/// Pair every operation with exactly one outcome
///
/// Outcomes are positional. Extra outcomes are dropped; operations the store
/// left out are reported as rejected.
fn normalize_outcomes(
    chunk: &[IndexOperation],
    mut outcomes: Vec<OperationOutcome>,
) -> Vec<OperationOutcome> {
    if outcomes.len() != chunk.len() {
        warn!(
            expected = chunk.len(),
            received = outcomes.len(),
            "Bulk response does not cover the chunk"
        );
    }
    outcomes.truncate(chunk.len());
    let reported = outcomes.len();
    outcomes.extend(
        chunk[reported..]
            .iter()
            .map(|op| OperationOutcome::rejected(&op.id, "missing_outcome: store reported no result")),
    );
    outcomes
}

fn failure_category(err: &StoreError) -> &'static str {
    match err {
        StoreError::Unreachable { .. } => "unreachable",
        StoreError::Timeout(_) => "timeout",
        StoreError::Http { .. } => "http_error",
        StoreError::Protocol(_) => "protocol_error",
        StoreError::Transport(_) => "transport",
    }
}
