//! Elasticsearch index collaborator.
//!
//! Writes go through the `_bulk` API as NDJSON: inserts as `index` actions
//! keyed by the record's logical id, merges as `update` actions carrying a
//! partial `doc`. Existing documents are resolved with an `ids` query, which
//! matches `_id` exactly whatever the mapping of the id field. A missing
//! index resolves to no existing documents.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors and timeouts → retry
//! - backoff after attempt `n` is `2^n` seconds (capped at 32s), up to
//!   `index.max_retries` retries

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::models::IndexOp;
use crate::traits::{BulkItemError, BulkResponse, SearchIndex};

/// A non-retryable HTTP status returned by the cluster.
#[derive(Error, Debug)]
#[error("Elasticsearch error {status}: {body}")]
pub struct HttpStatusError {
    pub status: u16,
    pub body: String,
}

impl HttpStatusError {
    fn is_missing_index(&self) -> bool {
        self.status == 404 && self.body.contains("index_not_found_exception")
    }
}

pub struct ElasticIndex {
    client: reqwest::Client,
    host_url: String,
    index: String,
    id_field: String,
    username: Option<String>,
    password: Option<String>,
    max_retries: u32,
    timeout: Duration,
    backoff_base: Duration,
}

impl ElasticIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client for Elasticsearch")?;
        Ok(Self {
            client,
            host_url: config.host_url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            id_field: config.id_field.clone(),
            username: config.username.clone(),
            password: config.resolved_password(),
            max_retries: config.max_retries,
            timeout: config.timeout(),
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Scale the retry backoff. The delay before retry `n` is `base * 2^n`.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn post_with_retry(
        &self,
        url: &str,
        content_type: &str,
        body: String,
        timeout: Duration,
    ) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * (1u32 << attempt.min(5));
                warn!(attempt, max_retries = self.max_retries, delay_ms = delay.as_millis() as u64, "retrying Elasticsearch request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(url)
                .timeout(timeout)
                .header("Content-Type", content_type)
                .body(body.clone());
            if let Some(user) = &self.username {
                request = request.basic_auth(user, self.password.as_deref());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .context("Invalid JSON from Elasticsearch");
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("Elasticsearch error {}: {}", status, text));
                        continue;
                    }
                    return Err(HttpStatusError {
                        status: status.as_u16(),
                        body: text,
                    }
                    .into());
                }
                Err(e) => {
                    last_err = Some(anyhow::Error::from(e).context("Elasticsearch request failed"));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Elasticsearch request failed after retries")))
    }
}

/// NDJSON body for a `_bulk` request.
pub fn bulk_body(index: &str, ops: &[IndexOp]) -> Result<String> {
    let mut body = String::new();
    for op in ops {
        let (action, source) = match op {
            IndexOp::Insert(record) => (
                json!({ "index": { "_index": index, "_id": record.id } }),
                serde_json::to_value(record)?,
            ),
            IndexOp::Update { id, partial_doc } => (
                json!({ "update": { "_index": index, "_id": id } }),
                json!({ "doc": partial_doc }),
            ),
        };
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&source)?);
        body.push('\n');
    }
    Ok(body)
}

/// Per-item results of a `_bulk` response, aligned with the submitted ops.
pub fn parse_bulk_response(json: &Value, ops: &[IndexOp]) -> Result<BulkResponse> {
    let items = json
        .get("items")
        .and_then(Value::as_array)
        .context("Invalid bulk response: missing items array")?;

    let mut response = BulkResponse::default();
    for (i, item) in items.iter().enumerate() {
        let record_id = ops.get(i).and_then(|op| op.record_id()).map(str::to_string);
        let Some((action, result)) = item.as_object().and_then(|o| o.iter().next()) else {
            response.errors.push(BulkItemError {
                record_id,
                reason: "malformed bulk item".to_string(),
            });
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        if let Some(error) = result.get("error") {
            let reason = error
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            response.errors.push(BulkItemError {
                record_id,
                reason: format!("{} (status {})", reason, status),
            });
            continue;
        }
        if !(200..300).contains(&status) {
            response.errors.push(BulkItemError {
                record_id,
                reason: format!("status {}", status),
            });
            continue;
        }
        match action.as_str() {
            "update" => response.updated += 1,
            _ => response.inserted += 1,
        }
    }
    if items.len() < ops.len() {
        for op in &ops[items.len()..] {
            response.errors.push(BulkItemError {
                record_id: op.record_id().map(str::to_string),
                reason: "missing from bulk response".to_string(),
            });
        }
    }
    Ok(response)
}

/// Logical id → `_id` from a `_search` response. Hits without the id field
/// in their source fall back to `_id`.
pub fn parse_search_hits(json: &Value, id_field: &str) -> HashMap<String, String> {
    json.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let internal = hit.get("_id")?.as_str()?;
                    let logical = hit
                        .get("_source")
                        .and_then(|src| src.get(id_field))
                        .and_then(Value::as_str)
                        .unwrap_or(internal);
                    Some((logical.to_string(), internal.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!("{}/{}/_search?ignore_unavailable=true", self.host_url, self.index);
        let body = json!({
            "size": ids.len(),
            "_source": [self.id_field],
            "query": { "ids": { "values": ids } }
        });
        let json = match self
            .post_with_retry(&url, "application/json", body.to_string(), self.timeout)
            .await
        {
            Ok(json) => json,
            Err(e) if e.downcast_ref::<HttpStatusError>().is_some_and(HttpStatusError::is_missing_index) => {
                debug!(index = %self.index, "index does not exist yet, nothing to merge");
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e),
        };
        let found = parse_search_hits(&json, &self.id_field);
        debug!(requested = ids.len(), found = found.len(), "resolved existing documents");
        Ok(found)
    }

    async fn bulk_upsert(&self, ops: Vec<IndexOp>, timeout: Duration) -> Result<BulkResponse> {
        if ops.is_empty() {
            return Ok(BulkResponse::default());
        }
        let url = format!("{}/_bulk", self.host_url);
        let body = bulk_body(&self.index, &ops)?;
        let json = self
            .post_with_retry(&url, "application/x-ndjson", body, timeout)
            .await?;
        parse_bulk_response(&json, &ops)
    }
}
