//! Shard discovery
//!
//! Lists the input directory and keeps regular files whose name ends in the
//! configured suffix. Results are sorted by relative path so repeated runs
//! see shards in the same order.

use std::path::PathBuf;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{IngestError, Result};
use crate::models::ShardHandle;

/// Finds compressed document shards in a directory
#[derive(Debug, Clone)]
pub struct ShardScanner {
    root: PathBuf,
    suffix: String,
    recursive: bool,
}

impl ShardScanner {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
            recursive: false,
        }
    }

    /// Descend into subdirectories as well
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// List matching shards
    ///
    /// Fails with [`IngestError::DirectoryUnreadable`] when the root is
    /// missing, is not a directory, or cannot be listed. Files that do not
    /// match the suffix are skipped silently.
    pub fn scan(&self) -> Result<Vec<ShardHandle>> {
        let metadata = std::fs::metadata(&self.root).map_err(|e| self.unreadable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(self.unreadable("not a directory"));
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut shards = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| self.unreadable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if !file_name.ends_with(&self.suffix) {
                debug!(file = %file_name, "Skipping non-shard file");
                continue;
            }

            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let name = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();

            shards.push(ShardHandle {
                path: entry.path().to_path_buf(),
                name,
                size_bytes,
            });
        }

        shards.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            directory = %self.root.display(),
            suffix = %self.suffix,
            shards = shards.len(),
            "Shard scan complete"
        );

        Ok(shards)
    }

    fn unreadable(&self, reason: impl Into<String>) -> IngestError {
        IngestError::DirectoryUnreadable {
            path: self.root.clone(),
            reason: reason.into(),
        }
    }
}
