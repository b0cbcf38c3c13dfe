//! Elasticsearch-compatible HTTP store

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use super::DocumentStore;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::{IndexOperation, OperationOutcome};

/// Longest error body kept in [`StoreError::Http`]
const MAX_ERROR_BODY: usize = 512;

/// Client for a cluster exposing `/_bulk` and `/{index}/_doc/{id}`
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: u64,
}

impl ElasticsearchStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.cluster_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    fn map_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout_secs)
        } else if err.is_connect() {
            StoreError::Unreachable {
                endpoint: self.base_url.clone(),
                reason: err.to_string(),
            }
        } else {
            StoreError::Transport(err.to_string())
        }
    }

    async fn http_error(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        StoreError::Http { status, body }
    }
}

/// NDJSON body for `POST /_bulk`: an action line then the source line
pub fn encode_bulk_body(operations: &[IndexOperation]) -> Result<Vec<u8>, StoreError> {
    let mut body = Vec::with_capacity(operations.len() * 256);
    for op in operations {
        let mut action = serde_json::Map::new();
        action.insert(
            op.kind.as_str().to_string(),
            serde_json::json!({ "_index": op.collection, "_id": op.id }),
        );
        serde_json::to_writer(&mut body, &action)
            .map_err(|e| StoreError::protocol(format!("cannot encode action for '{}': {}", op.id, e)))?;
        body.push(b'\n');
        serde_json::to_writer(&mut body, &op.payload)
            .map_err(|e| StoreError::protocol(format!("cannot encode document '{}': {}", op.id, e)))?;
        body.push(b'\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

fn describe_item_error(status: u16, error: Option<&Value>) -> String {
    match error {
        Some(Value::Object(fields)) => {
            let kind = fields.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = fields.get("reason").and_then(Value::as_str).unwrap_or("no reason given");
            format!("{} ({}): {}", kind, status, reason)
        }
        Some(other) => format!("HTTP {}: {}", status, other),
        None => format!("HTTP {}", status),
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        let response = self
            .request(Method::GET, "")
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(Self::http_error(response).await);
        }
        Ok(())
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let path = format!(
            "{}/_doc/{}",
            urlencoding::encode(collection),
            urlencoding::encode(id)
        );
        let response = self
            .request(Method::HEAD, &path)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::http_error(response).await),
        }
    }

    #[instrument(skip_all, fields(operations = operations.len()))]
    async fn bulk(&self, operations: &[IndexOperation]) -> Result<Vec<OperationOutcome>, StoreError> {
        let body = encode_bulk_body(operations)?;

        let response = self
            .request(Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(Self::http_error(response).await);
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .map_err(|e| StoreError::protocol(format!("cannot parse bulk response: {}", e)))?;

        debug!(errors = parsed.errors, items = parsed.items.len(), "Bulk response received");

        let outcomes = operations
            .iter()
            .zip(parsed.items)
            .map(|(op, item)| {
                let Some(result) = item.into_values().next() else {
                    return OperationOutcome::rejected(&op.id, "empty bulk item");
                };
                if (200..300).contains(&result.status) {
                    OperationOutcome::indexed(&op.id)
                } else {
                    OperationOutcome::rejected(
                        &op.id,
                        describe_item_error(result.status, result.error.as_ref()),
                    )
                }
            })
            .collect();

        Ok(outcomes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::OperationKind;
    use serde_json::json;

    fn op(id: &str) -> IndexOperation {
        let Value::Object(payload) = json!({"id": id, "body": "text"}) else {
            unreachable!()
        };
        IndexOperation {
            kind: OperationKind::Index,
            collection: "docs".to_string(),
            id: id.to_string(),
            payload,
        }
    }

    #[test]
    fn test_encode_bulk_body() {
        let body = encode_bulk_body(&[op("1"), op("2")]).unwrap();
        let text = String::from_utf8(body).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action, json!({"index": {"_index": "docs", "_id": "1"}}));
        let source: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source["body"], "text");
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_describe_item_error() {
        let err = json!({"type": "version_conflict_engine_exception", "reason": "already exists"});
        assert_eq!(
            describe_item_error(409, Some(&err)),
            "version_conflict_engine_exception (409): already exists"
        );
        assert_eq!(describe_item_error(500, None), "HTTP 500");
    }

    #[test]
    fn test_base_url_trimmed() {
        let config = StoreConfig {
            cluster_url: "http://localhost:9200/".to_string(),
            username: None,
            password: None,
            index: "docs".to_string(),
            timeout_secs: 5,
        };
        let store = ElasticsearchStore::new(&config).unwrap();
        assert_eq!(store.base_url(), "http://localhost:9200");
    }
}
