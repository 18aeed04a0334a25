//! In-process [`SearchIndex`] used by `--dry-run`, the `memory` backend and
//! tests.
//!
//! Documents are kept as JSON objects under random internal ids, the same
//! shape an external index would hold. Lookups by logical id are a full
//! scan. Specific logical ids can be marked as rejected to exercise
//! partial-failure handling.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::IndexOp;
use crate::traits::{BulkItemError, BulkResponse, SearchIndex};

pub struct MemoryIndex {
    docs: RwLock<HashMap<String, Value>>,
    rejected: RwLock<HashSet<String>>,
    batch_sizes: RwLock<Vec<usize>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
            batch_sizes: RwLock::new(Vec::new()),
        }
    }

    /// Make every future write for this logical id fail.
    pub fn reject(&self, record_id: impl Into<String>) {
        if let Ok(mut rejected) = self.rejected.write() {
            rejected.insert(record_id.into());
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored documents carrying this logical id.
    pub fn count_logical(&self, record_id: &str) -> usize {
        self.docs
            .read()
            .map(|docs| {
                docs.values()
                    .filter(|d| d.get("id").and_then(Value::as_str) == Some(record_id))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Stored document for a logical id.
    pub fn get_logical(&self, record_id: &str) -> Option<Value> {
        let docs = self.docs.read().ok()?;
        docs.values()
            .find(|d| d.get("id").and_then(Value::as_str) == Some(record_id))
            .cloned()
    }

    /// Size of every bulk call received, in arrival order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .read()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    fn is_rejected(&self, record_id: Option<&str>) -> bool {
        match (record_id, self.rejected.read()) {
            (Some(id), Ok(rejected)) => rejected.contains(id),
            _ => false,
        }
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory index lock poisoned")
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs
            .iter()
            .filter_map(|(internal, doc)| {
                let logical = doc.get("id").and_then(Value::as_str)?;
                wanted
                    .contains(logical)
                    .then(|| (logical.to_string(), internal.clone()))
            })
            .collect())
    }

    async fn bulk_upsert(&self, ops: Vec<IndexOp>, _timeout: Duration) -> Result<BulkResponse> {
        self.batch_sizes.write().map_err(poisoned)?.push(ops.len());

        let mut response = BulkResponse::default();
        for op in ops {
            let record_id = op.record_id().map(str::to_string);
            if self.is_rejected(record_id.as_deref()) {
                response.errors.push(BulkItemError {
                    record_id,
                    reason: "rejected by memory index".to_string(),
                });
                continue;
            }

            let mut docs = self.docs.write().map_err(poisoned)?;
            match op {
                IndexOp::Insert(record) => {
                    docs.insert(Uuid::new_v4().to_string(), serde_json::to_value(&record)?);
                    response.inserted += 1;
                }
                IndexOp::Update { id, partial_doc } => match docs.get_mut(&id) {
                    Some(Value::Object(existing)) => {
                        if let Value::Object(fields) = partial_doc {
                            existing.extend(fields);
                        }
                        response.updated += 1;
                    }
                    _ => response.errors.push(BulkItemError {
                        record_id,
                        reason: format!("document {} not found", id),
                    }),
                },
            }
        }
        Ok(response)
    }
}
