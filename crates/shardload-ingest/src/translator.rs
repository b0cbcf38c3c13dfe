//! Document to index-operation translation

use serde_json::Value;

use crate::error::{IngestError, Result};
use crate::models::{Document, IndexOperation, OperationKind};

/// Turns decoded documents into index operations for one collection
#[derive(Debug, Clone)]
pub struct ActionTranslator {
    collection: String,
    id_field: String,
}

impl ActionTranslator {
    pub fn new(collection: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id_field: id_field.into(),
        }
    }

    /// Read the identifier without consuming the document
    ///
    /// Strings are used verbatim, integers in decimal. Anything else,
    /// including an empty string, counts as missing.
    pub fn identifier(&self, document: &Document) -> Option<String> {
        match document.get(&self.id_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
            _ => None,
        }
    }

    /// Build the index operation for `document`
    ///
    /// `shard` and `line` only feed the error message.
    pub fn translate(&self, document: Document, shard: &str, line: u64) -> Result<IndexOperation> {
        let id = self
            .identifier(&document)
            .ok_or_else(|| IngestError::MissingIdentifier {
                shard: shard.to_string(),
                line,
                field: self.id_field.clone(),
            })?;

        Ok(IndexOperation {
            kind: OperationKind::Index,
            collection: self.collection.clone(),
            id,
            payload: document,
        })
    }
}
