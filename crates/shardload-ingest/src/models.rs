//! Core data types flowing through the pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::IngestError;

/// One decoded JSON object, keyed by field name
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Reference to one compressed input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardHandle {
    /// Full path to the shard
    pub path: PathBuf,
    /// Path relative to the input directory, used in logs and errors
    pub name: String,
    /// Compressed size on disk
    pub size_bytes: u64,
}

/// Kind of write the store should perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create or overwrite the record under its id
    Index,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Index => "index",
        }
    }
}

/// A single write destined for the store
///
/// Produced by the translator and consumed exactly once by the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOperation {
    pub kind: OperationKind,
    pub collection: String,
    pub id: String,
    pub payload: Document,
}

/// What happened to one submitted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Indexed,
    Rejected { reason: String },
}

/// Per-operation result reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub id: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl OperationOutcome {
    pub fn indexed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: OutcomeStatus::Indexed,
        }
    }

    pub fn rejected(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: OutcomeStatus::Rejected {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Indexed)
    }

    /// The rejection as an error, if the store refused the operation
    pub fn rejection(&self) -> Option<IngestError> {
        match &self.status {
            OutcomeStatus::Indexed => None,
            OutcomeStatus::Rejected { reason } => Some(IngestError::OperationRejected {
                id: self.id.clone(),
                reason: reason.clone(),
            }),
        }
    }
}
