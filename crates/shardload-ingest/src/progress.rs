//! Progress tracking and outcome tallying
//!
//! Counters are plain atomics, bumped as outcomes arrive rather than as
//! operations are sent. [`OutcomeAggregator::snapshot`] only loads them, so
//! reading progress never waits on submission.

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::models::{OperationOutcome, OutcomeStatus};

/// Run-wide counts
///
/// `submitted == succeeded + failed` always holds. Skipped documents never
/// reach the submitter and are not part of `submitted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Lines that did not decode to a JSON object
    pub malformed: u64,
    pub shards_total: u64,
    /// Shards that could not be opened or broke part-way
    pub shards_failed: u64,
    /// Existence checks that errored
    pub lookup_failures: u64,
    /// Bulk requests attempted
    pub chunks: u64,
}

/// Thread-safe accumulator behind [`OutcomeTally`]
pub struct OutcomeAggregator {
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    malformed: AtomicU64,
    shards_total: AtomicU64,
    shards_failed: AtomicU64,
    lookup_failures: AtomicU64,
    chunks: AtomicU64,
    failure_reasons: Mutex<BTreeMap<String, u64>>,
    bar: ProgressBar,
}

impl std::fmt::Debug for OutcomeAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeAggregator")
            .field("tally", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Default for OutcomeAggregator {
    fn default() -> Self {
        Self::new(ProgressBar::hidden())
    }
}

impl OutcomeAggregator {
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            shards_total: AtomicU64::new(0),
            shards_failed: AtomicU64::new(0),
            lookup_failures: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            failure_reasons: Mutex::new(BTreeMap::new()),
            bar,
        }
    }

    pub fn progress_bar(&self) -> &ProgressBar {
        &self.bar
    }

    pub fn set_shards_total(&self, shards: u64) {
        self.shards_total.store(shards, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(1);
    }

    /// Count one failed document under a reason category
    pub fn record_failure(&self, category: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self
            .failure_reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category.to_string())
            .or_insert(0) += 1;
        self.bar.inc(1);
    }

    /// Apply one store outcome
    pub fn record_outcome(&self, outcome: &OperationOutcome) {
        match &outcome.status {
            OutcomeStatus::Indexed => self.record_success(),
            OutcomeStatus::Rejected { reason } => {
                if let Some(err) = outcome.rejection() {
                    debug!(error = %err, "Operation rejected");
                }
                self.record_failure(&rejection_category(reason));
            }
        }
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(1);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(1);
    }

    pub fn record_shard_failed(&self) {
        self.shards_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_failure(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Current totals; cheap and non-blocking
    pub fn snapshot(&self) -> OutcomeTally {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        OutcomeTally {
            submitted: succeeded + failed,
            succeeded,
            failed,
            skipped: self.skipped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            shards_total: self.shards_total.load(Ordering::Relaxed),
            shards_failed: self.shards_failed.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
        }
    }

    /// Failure counts per reason category
    pub fn failure_reasons(&self) -> BTreeMap<String, u64> {
        self.failure_reasons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the bar and leave the final count on screen
    pub fn finish(&self) {
        let tally = self.snapshot();
        self.bar.finish_with_message(format!(
            "done: {} indexed, {} failed, {} skipped",
            tally.succeeded, tally.failed, tally.skipped
        ));
        if tally.failed > 0 {
            warn!(failed = tally.failed, "Some documents were not indexed");
        }
    }
}

/// Collapse a rejection reason to its leading error type, e.g.
/// "mapper_parsing_exception (400): failed to parse" -> "mapper_parsing_exception"
fn rejection_category(reason: &str) -> String {
    reason
        .split([' ', ':', '('])
        .find(|part| !part.is_empty())
        .unwrap_or("rejected")
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_submitted_is_sum_of_outcomes() {
        let agg = OutcomeAggregator::default();
        agg.record_outcome(&OperationOutcome::indexed("a"));
        agg.record_outcome(&OperationOutcome::indexed("b"));
        agg.record_outcome(&OperationOutcome::rejected("c", "version_conflict (409): exists"));
        agg.record_failure("missing_identifier");
        agg.record_skipped();
        agg.record_malformed();

        let tally = agg.snapshot();
        assert_eq!(tally.submitted, 4);
        assert_eq!(tally.succeeded, 2);
        assert_eq!(tally.failed, 2);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.malformed, 1);
        assert_eq!(tally.submitted, tally.succeeded + tally.failed);
    }

    #[test]
    fn test_failure_reasons_grouped() {
        let agg = OutcomeAggregator::default();
        agg.record_outcome(&OperationOutcome::rejected("a", "mapper_parsing_exception (400): bad"));
        agg.record_outcome(&OperationOutcome::rejected("b", "mapper_parsing_exception (400): worse"));
        agg.record_failure("missing_identifier");

        let reasons = agg.failure_reasons();
        assert_eq!(reasons.get("mapper_parsing_exception"), Some(&2));
        assert_eq!(reasons.get("missing_identifier"), Some(&1));
    }

    #[test]
    fn test_rejection_category() {
        assert_eq!(rejection_category("version_conflict: document is locked"), "version_conflict");
        assert_eq!(rejection_category("HTTP 500"), "HTTP");
        assert_eq!(rejection_category(""), "rejected");
    }

    #[test]
    fn test_concurrent_updates() {
        let agg = Arc::new(OutcomeAggregator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = Arc::clone(&agg);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        agg.record_success();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(agg.snapshot().succeeded, 8000);
    }
}
