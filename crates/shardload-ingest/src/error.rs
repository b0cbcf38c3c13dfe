//! Error types for shardload ingestion
//!
//! Fatal variants abort the run; the per-line, per-document and
//! per-operation variants are counted in the tally and never stop sibling
//! work.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    /// Input directory is missing or cannot be listed (fatal)
    #[error("Input directory '{path}' is unreadable: {reason}")]
    DirectoryUnreadable { path: PathBuf, reason: String },

    /// A shard could not be opened or its compressed stream broke (per shard)
    #[error("Shard '{shard}' is unreadable: {reason}")]
    ShardUnreadable { shard: String, reason: String },

    /// One line failed to decode as a JSON object (per line)
    #[error("Malformed record at {shard}:{line}: {reason}")]
    MalformedRecord {
        shard: String,
        line: u64,
        reason: String,
    },

    /// Document has no usable identifier field (per document)
    #[error("Document at {shard}:{line} has no usable '{field}' field")]
    MissingIdentifier {
        shard: String,
        line: u64,
        field: String,
    },

    /// Health check failed before any submission (fatal)
    #[error("Document store unreachable: {0}")]
    StoreUnreachable(#[source] StoreError),

    /// The store refused one operation (per operation)
    #[error("Operation for '{id}' rejected: {reason}")]
    OperationRejected { id: String, reason: String },

    /// Existence check failed and the lookup policy is `abort`
    #[error("Existence check for '{id}' failed: {source}")]
    LookupFailed {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error ends the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnreadable { .. }
                | Self::StoreUnreachable(_)
                | Self::Config(_)
                | Self::Io(_)
        )
    }
}

/// Failures talking to the document store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("cannot connect to {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("store answered HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unexpected store response: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
