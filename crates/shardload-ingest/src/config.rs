//! Ingestion configuration
//!
//! Loaded once at startup from a YAML file shaped like:
//!
//! ```yaml
//! elasticsearch:
//!   cluster_url: http://localhost:9200
//!   username: elastic
//!   password: changeme
//!   index: documents
//! data_files:
//!   path: ./data
//! ingest:
//!   chunk_size: 500
//!   concurrency: 4
//!   dedup: true
//! ```
//!
//! `SHARDLOAD_*` environment variables override file values, and CLI flags
//! override both. The result is validated and then never mutated.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::scanner::ShardScanner;
use crate::submitter::SubmissionMode;

/// Shard suffix used when none is configured
pub const DEFAULT_SHARD_SUFFIX: &str = ".json.gz";

/// Operations per bulk request when none is configured
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// Target store connection and collection
    pub elasticsearch: StoreConfig,
    /// Where the input shards live
    pub data_files: DataFilesConfig,
    /// Pipeline tuning
    #[serde(default)]
    pub ingest: PipelineConfig,
}

/// Document store connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub cluster_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Target collection (index) name
    pub index: String,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("cluster_url", &self.cluster_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("index", &self.index)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Input directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataFilesConfig {
    pub path: PathBuf,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Descend into subdirectories
    #[serde(default)]
    pub recursive: bool,
}

/// What to do when an existence lookup cannot be answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// Index the document anyway; duplicates are preferred over data loss
    #[default]
    AssumeMissing,
    /// Fail the document and raise the stop signal
    Abort,
}

impl std::str::FromStr for LookupFailurePolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "assume_missing" => Ok(Self::AssumeMissing),
            "abort" => Ok(Self::Abort),
            _ => Err(IngestError::config(format!(
                "Invalid lookup failure policy '{}'. Must be 'assume_missing' or 'abort'",
                s
            ))),
        }
    }
}

/// Pipeline tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Operations per bulk request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks allowed in flight at once; 1 means sequential submission
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Look each id up in the store and skip documents already present.
    /// Costs one store round-trip per document.
    #[serde(default)]
    pub dedup: bool,
    /// Field carrying the document identifier
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub on_lookup_failure: LookupFailurePolicy,
    /// Chunk-level transport failures in a row before new submissions stop
    #[serde(default = "default_max_transport_failures")]
    pub max_consecutive_transport_failures: u32,
    /// Decoded documents buffered between the decoder and the submitter
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Count documents in a separate pass so progress has a total
    #[serde(default)]
    pub precount: bool,
    /// Render a progress bar on stderr
    #[serde(default = "default_true")]
    pub progress: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_suffix() -> String {
    DEFAULT_SHARD_SUFFIX.to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    1
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_max_transport_failures() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            dedup: false,
            id_field: default_id_field(),
            on_lookup_failure: LookupFailurePolicy::default(),
            max_consecutive_transport_failures: default_max_transport_failures(),
            queue_capacity: default_queue_capacity(),
            precount: false,
            progress: true,
        }
    }
}

impl IngestConfig {
    /// Minimal configuration; everything else takes defaults
    pub fn new(
        cluster_url: impl Into<String>,
        index: impl Into<String>,
        data_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            elasticsearch: StoreConfig {
                cluster_url: cluster_url.into(),
                username: None,
                password: None,
                index: index.into(),
                timeout_secs: default_timeout_secs(),
            },
            data_files: DataFilesConfig {
                path: data_path.into(),
                suffix: default_suffix(),
                recursive: false,
            },
            ingest: PipelineConfig::default(),
        }
    }

    /// Read a YAML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml_str(&raw)?.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without applying overrides or validation
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| IngestError::config(format!("Invalid configuration file: {}", e)))
    }

    /// Apply `SHARDLOAD_*` overrides from the process environment
    pub fn merge_env(self) -> Result<Self> {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn merge_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SHARDLOAD_CLUSTER_URL") {
            self.elasticsearch.cluster_url = url;
        }
        if let Some(user) = lookup("SHARDLOAD_USERNAME") {
            self.elasticsearch.username = Some(user);
        }
        if let Some(password) = lookup("SHARDLOAD_PASSWORD") {
            self.elasticsearch.password = Some(password);
        }
        if let Some(index) = lookup("SHARDLOAD_INDEX") {
            self.elasticsearch.index = index;
        }
        if let Some(secs) = lookup("SHARDLOAD_TIMEOUT_SECS") {
            self.elasticsearch.timeout_secs = parse_var("SHARDLOAD_TIMEOUT_SECS", &secs)?;
        }
        if let Some(path) = lookup("SHARDLOAD_DATA_PATH") {
            self.data_files.path = PathBuf::from(path);
        }
        if let Some(suffix) = lookup("SHARDLOAD_SHARD_SUFFIX") {
            self.data_files.suffix = suffix;
        }
        if let Some(size) = lookup("SHARDLOAD_CHUNK_SIZE") {
            self.ingest.chunk_size = parse_var("SHARDLOAD_CHUNK_SIZE", &size)?;
        }
        if let Some(width) = lookup("SHARDLOAD_CONCURRENCY") {
            self.ingest.concurrency = parse_var("SHARDLOAD_CONCURRENCY", &width)?;
        }
        if let Some(dedup) = lookup("SHARDLOAD_DEDUP") {
            self.ingest.dedup = parse_var("SHARDLOAD_DEDUP", &dedup)?;
        }
        if let Some(policy) = lookup("SHARDLOAD_ON_LOOKUP_FAILURE") {
            self.ingest.on_lookup_failure = policy.parse()?;
        }
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.elasticsearch.cluster_url.trim().is_empty() {
            return Err(IngestError::config("elasticsearch.cluster_url cannot be empty"));
        }
        if self.elasticsearch.index.trim().is_empty() {
            return Err(IngestError::config("elasticsearch.index cannot be empty"));
        }
        if self.elasticsearch.timeout_secs == 0 {
            return Err(IngestError::config("elasticsearch.timeout_secs must be greater than 0"));
        }
        if self.elasticsearch.password.is_some() && self.elasticsearch.username.is_none() {
            return Err(IngestError::config("elasticsearch.password is set without a username"));
        }
        if self.data_files.suffix.is_empty() {
            return Err(IngestError::config("data_files.suffix cannot be empty"));
        }
        if self.ingest.chunk_size == 0 {
            return Err(IngestError::config("ingest.chunk_size must be greater than 0"));
        }
        if self.ingest.concurrency == 0 {
            return Err(IngestError::config("ingest.concurrency must be greater than 0"));
        }
        if self.ingest.id_field.is_empty() {
            return Err(IngestError::config("ingest.id_field cannot be empty"));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(IngestError::config("ingest.queue_capacity must be greater than 0"));
        }
        if self.ingest.max_consecutive_transport_failures == 0 {
            return Err(IngestError::config(
                "ingest.max_consecutive_transport_failures must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Submission strategy implied by `ingest.concurrency`
    pub fn submission_mode(&self) -> SubmissionMode {
        SubmissionMode::from_concurrency(self.ingest.concurrency)
    }

    /// Scanner over the configured input directory
    pub fn scanner(&self) -> ShardScanner {
        ShardScanner::new(&self.data_files.path, &self.data_files.suffix)
            .recursive(self.data_files.recursive)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.elasticsearch.timeout_secs)
    }

    pub fn collection(&self) -> &str {
        &self.elasticsearch.index
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IngestError::config(format!("{} has an invalid value: '{}'", key, value)))
}
