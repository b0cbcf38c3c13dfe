//! End-of-run summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardload_common::progress::format_count;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::progress::OutcomeTally;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every submitted document was indexed
    Success,
    /// The run finished but some documents failed
    PartialFailure,
    /// The stop signal was raised before the input was exhausted
    Aborted,
}

impl RunStatus {
    pub fn from_tally(tally: &OutcomeTally, aborted: bool) -> Self {
        if aborted {
            Self::Aborted
        } else if tally.failed == 0 {
            Self::Success
        } else {
            Self::PartialFailure
        }
    }

    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::PartialFailure => 2,
            Self::Aborted => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial failure",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final report for one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub collection: String,
    pub status: RunStatus,
    pub tally: OutcomeTally,
    /// Failed documents per reason category
    pub failure_reasons: BTreeMap<String, u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Indexed documents per second of wall time
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.tally.succeeded as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tally = &self.tally;
        writeln!(f, "Successfully indexed {} documents.", tally.succeeded)?;
        if tally.failed > 0 {
            writeln!(f, "Failed to index {} documents.", tally.failed)?;
            for (reason, count) in &self.failure_reasons {
                writeln!(f, "  {}: {}", reason, format_count(*count))?;
            }
        }
        if tally.skipped > 0 {
            writeln!(f, "Skipped {} documents already in '{}'.", tally.skipped, self.collection)?;
        }
        if tally.malformed > 0 {
            writeln!(f, "Skipped {} malformed lines.", tally.malformed)?;
        }
        if tally.lookup_failures > 0 {
            writeln!(f, "{} existence checks failed.", tally.lookup_failures)?;
        }
        writeln!(
            f,
            "Shards: {} read, {} unreadable. Bulk requests: {}.",
            tally.shards_total - tally.shards_failed.min(tally.shards_total),
            tally.shards_failed,
            tally.chunks
        )?;
        write!(
            f,
            "Run {} finished with status: {} in {:.1}s ({:.0} docs/s)",
            self.run_id,
            self.status,
            self.duration.as_secs_f64(),
            self.throughput()
        )
    }
}
