//! Ingestion pipeline
//!
//! Scanner -> Decoder -> (Existence Filter) -> Translator -> Submitter, with
//! every outcome landing in one [`OutcomeAggregator`].
//!
//! Decoding is synchronous and runs on a blocking thread. It pushes events
//! into a bounded queue, so a slow store pushes back on the decoder instead
//! of buffering the input in memory. The async side filters, translates and
//! chunks, and the submitter pulls chunks as it has room for them.
//!
//! The stop signal ends the chunk stream. Chunks already handed to the store
//! are allowed to finish and their outcomes are counted. A run only reports
//! `Aborted` if the signal left documents unprocessed.

use chrono::Utc;
use futures::{future, StreamExt};
use indicatif::ProgressBar;
use shardload_common::progress::{create_counter, create_progress_bar};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::decoder::{count_lines, decode_shards, DecodeEvent, DecodeSummary};
use crate::error::{IngestError, Result};
use crate::filter::{ExistenceFilter, FilterVerdict};
use crate::models::{IndexOperation, ShardHandle};
use crate::progress::{OutcomeAggregator, OutcomeTally};
use crate::report::{RunReport, RunStatus};
use crate::store::DocumentStore;
use crate::submitter::BulkSubmitter;
use crate::translator::ActionTranslator;

/// One configured ingestion run
///
/// Built once from an immutable configuration and a store handle. Call
/// [`cancellation_token`](Self::cancellation_token) before [`run`](Self::run)
/// to be able to stop it from outside.
pub struct IngestPipeline {
    config: Arc<IngestConfig>,
    store: Arc<dyn DocumentStore>,
    cancel: CancellationToken,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Raising this token stops new chunk submissions
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline to completion
    ///
    /// Returns `Err` only for fatal conditions: the store failing its health
    /// check or the input directory being unreadable. Everything else is
    /// counted in the report.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, collection = %self.config.collection());
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mode = self.config.submission_mode();
        let ingest = &self.config.ingest;

        info!(
            data_path = %self.config.data_files.path.display(),
            chunk_size = ingest.chunk_size,
            mode = %mode,
            dedup = ingest.dedup,
            "Starting ingestion run"
        );

        self.store
            .health_check()
            .await
            .map_err(IngestError::StoreUnreachable)?;

        let shards = self.config.scanner().scan()?;
        if shards.is_empty() {
            warn!("No shards matched, nothing to ingest");
        }

        let bar = self.progress_bar(&shards).await;
        let aggregator = Arc::new(OutcomeAggregator::new(bar));
        aggregator.set_shards_total(shards.len() as u64);

        let (tx, rx) = mpsc::channel(ingest.queue_capacity);
        let decoder_cancel = self.cancel.clone();
        let decoder_span = tracing::Span::current();
        let producer = tokio::task::spawn_blocking(move || {
            let _entered = decoder_span.enter();
            decode_shards(shards, tx, decoder_cancel)
        });

        let translator = ActionTranslator::new(self.config.collection(), &ingest.id_field);
        let filter = ingest.dedup.then(|| {
            ExistenceFilter::new(
                Arc::clone(&self.store),
                self.config.collection(),
                ingest.on_lookup_failure,
                Arc::clone(&aggregator),
                self.cancel.clone(),
            )
        });
        let submitter = BulkSubmitter::new(
            Arc::clone(&self.store),
            Arc::clone(&aggregator),
            self.cancel.clone(),
            ingest.max_consecutive_transport_failures,
        );

        let chunks = ReceiverStream::new(rx)
            .map(|event| admit(event, &translator, filter.as_ref(), &aggregator))
            .buffered(mode.width())
            .filter_map(future::ready)
            .chunks(ingest.chunk_size)
            .take_until(self.cancel.clone().cancelled_owned());

        submitter.drive(chunks, mode).await;

        // The receiver is gone by now, so a blocked decoder wakes up and exits
        let decoded = match producer.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Decoder task did not finish cleanly");
                DecodeSummary::default()
            }
        };

        aggregator.finish();
        let tally = aggregator.snapshot();
        let aborted = self.cancel.is_cancelled() && !input_exhausted(&decoded, &tally);
        if self.cancel.is_cancelled() && !aborted {
            debug!("Stop signal raised after every document was accounted for");
        }
        let status = RunStatus::from_tally(&tally, aborted);

        info!(
            submitted = tally.submitted,
            succeeded = tally.succeeded,
            failed = tally.failed,
            skipped = tally.skipped,
            malformed = tally.malformed,
            shards_failed = tally.shards_failed,
            chunks = tally.chunks,
            status = %status,
            "Ingestion run finished"
        );

        Ok(RunReport {
            run_id,
            collection: self.config.collection().to_string(),
            status,
            tally,
            failure_reasons: aggregator.failure_reasons(),
            started_at,
            completed_at: Utc::now(),
            duration: clock.elapsed(),
        })
    }

    async fn progress_bar(&self, shards: &[ShardHandle]) -> ProgressBar {
        if !self.config.ingest.progress {
            return ProgressBar::hidden();
        }
        if !self.config.ingest.precount {
            return create_counter("documents processed");
        }

        let owned = shards.to_vec();
        match tokio::task::spawn_blocking(move || precount(&owned)).await {
            Ok(total) => create_progress_bar(total, "Indexing documents"),
            Err(e) => {
                warn!(error = %e, "Precount failed, progress will have no total");
                create_counter("documents processed")
            }
        }
    }
}

/// Non-blank lines across all shards; unreadable shards count as empty
fn precount(shards: &[ShardHandle]) -> u64 {
    shards
        .iter()
        .map(|shard| match count_lines(shard) {
            Ok(lines) => lines,
            Err(e) => {
                debug!(shard = %shard.name, error = %e, "Cannot precount shard");
                0
            }
        })
        .sum()
}

/// Whether the stop signal, if raised, left no document behind
///
/// Every delivered document ends up either skipped or submitted; anything
/// short of that was dropped by the stop.
fn input_exhausted(decoded: &DecodeSummary, tally: &OutcomeTally) -> bool {
    decoded.completed && tally.skipped + tally.submitted == decoded.documents
}

/// Turn one decode event into an operation, or account for why not
async fn admit(
    event: DecodeEvent,
    translator: &ActionTranslator,
    filter: Option<&ExistenceFilter>,
    aggregator: &OutcomeAggregator,
) -> Option<IndexOperation> {
    match event {
        DecodeEvent::Document {
            shard,
            line,
            document,
        } => {
            // Without an id there is nothing to look up; the translator
            // reports it below
            if let (Some(filter), Some(id)) = (filter, translator.identifier(&document)) {
                match filter.check(&id).await {
                    FilterVerdict::Submit => {}
                    FilterVerdict::Skip => {
                        aggregator.record_skipped();
                        return None;
                    }
                    FilterVerdict::Fail(e) => {
                        debug!(error = %e, "Document dropped after failed lookup");
                        aggregator.record_failure("lookup_failed");
                        return None;
                    }
                }
            }

            match translator.translate(document, &shard, line) {
                Ok(op) => Some(op),
                Err(e) => {
                    warn!(error = %e, "Dropping document");
                    aggregator.record_failure("missing_identifier");
                    None
                }
            }
        }
        DecodeEvent::Malformed(_) => {
            aggregator.record_malformed();
            None
        }
        DecodeEvent::ShardFailed(_) => {
            aggregator.record_shard_failed();
            None
        }
        DecodeEvent::ShardFinished {
            shard,
            documents,
            malformed,
        } => {
            debug!(shard = %shard, documents, malformed, "Shard complete");
            None
        }
    }
}
