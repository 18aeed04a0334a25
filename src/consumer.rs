//! Indexing worker (consumer side of the pipeline).
//!
//! Each worker pops messages from the hand-off queue, accumulates records
//! and flushes them to the [`SearchIndex`] in batches of `batch_size`. The
//! remainder is flushed when the worker reads its end signal, so no record
//! is lost and no empty batch is ever sent.
//!
//! Counters are owned by the worker and returned on exit; the orchestrator
//! sums them after every worker has joined.

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::models::{IndexOp, Record, SyncStats};
use crate::queue::{HandoffQueue, Message};
use crate::traits::SearchIndex;

/// Per-worker totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexCounters {
    pub found: u64,
    pub indexed: u64,
    pub appended: u64,
    pub updated: u64,
    pub failed: u64,
}

impl AddAssign for IndexCounters {
    fn add_assign(&mut self, other: Self) {
        self.found += other.found;
        self.indexed += other.indexed;
        self.appended += other.appended;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

impl From<IndexCounters> for SyncStats {
    fn from(c: IndexCounters) -> Self {
        SyncStats {
            total_documents_found: c.found,
            total_documents_indexed: c.indexed,
            total_documents_appended: c.appended,
            total_documents_updated: c.updated,
            total_documents_failed: c.failed,
        }
    }
}

/// Submit one batch. Never fails: a failed call counts every record of the
/// batch as failed, per-item errors count only those items.
///
/// With `incremental`, records whose logical id already exists are sent as
/// merge updates against the existing document instead of new inserts.
pub async fn index_batch(
    index: &dyn SearchIndex,
    batch: Vec<Record>,
    incremental: bool,
    timeout: Duration,
) -> IndexCounters {
    let batch_len = batch.len() as u64;
    let mut counters = IndexCounters::default();
    if batch.is_empty() {
        return counters;
    }

    let ops = if incremental {
        let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
        let existing = match index.existing_ids(&ids).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(index = index.name(), batch_len, error = %format!("{:#}", e), "existing-document lookup failed, batch not indexed");
                counters.failed = batch_len;
                return counters;
            }
        };
        let mut ops = Vec::with_capacity(batch.len());
        for record in batch {
            match existing.get(&record.id) {
                Some(internal) => match serde_json::to_value(&record) {
                    Ok(partial_doc) => ops.push(IndexOp::Update {
                        id: internal.clone(),
                        partial_doc,
                    }),
                    Err(e) => {
                        warn!(record = %record.id, error = %e, "record could not be serialized");
                        counters.failed += 1;
                    }
                },
                None => ops.push(IndexOp::Insert(record)),
            }
        }
        ops
    } else {
        batch.into_iter().map(IndexOp::Insert).collect()
    };

    if ops.is_empty() {
        return counters;
    }

    match index.bulk_upsert(ops, timeout).await {
        Ok(response) => {
            for item in &response.errors {
                warn!(
                    index = index.name(),
                    record = item.record_id.as_deref().unwrap_or("<unknown>"),
                    reason = %item.reason,
                    "document failed to index"
                );
            }
            counters.appended += response.inserted as u64;
            counters.updated += response.updated as u64;
            counters.indexed += response.succeeded() as u64;
            counters.failed += response.errors.len() as u64;
            debug!(
                index = index.name(),
                batch_len,
                inserted = response.inserted,
                updated = response.updated,
                failed = response.errors.len(),
                "batch indexed"
            );
        }
        Err(e) => {
            warn!(index = index.name(), batch_len, error = %format!("{:#}", e), "bulk request failed, batch not indexed");
            counters.failed = batch_len;
        }
    }
    counters
}

pub struct IndexWorker {
    queue: HandoffQueue,
    index: Arc<dyn SearchIndex>,
    batch_size: usize,
    incremental: bool,
    timeout: Duration,
}

impl IndexWorker {
    pub fn new(
        queue: HandoffQueue,
        index: Arc<dyn SearchIndex>,
        batch_size: usize,
        incremental: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            queue,
            index,
            batch_size: batch_size.max(1),
            incremental,
            timeout,
        }
    }

    /// Consume until this worker's end signal, then flush the remainder.
    pub async fn run(&self, worker: usize) -> Result<IndexCounters> {
        let mut counters = IndexCounters::default();
        let mut pending: Vec<Record> = Vec::with_capacity(self.batch_size);

        loop {
            match self.queue.pop().await {
                Message::End => break,
                Message::Data(records) => {
                    counters.found += records.len() as u64;
                    for record in records {
                        pending.push(record);
                        if pending.len() >= self.batch_size {
                            let batch = std::mem::replace(&mut pending, Vec::with_capacity(self.batch_size));
                            counters += self.flush(batch).await;
                        }
                    }
                }
            }
        }

        if !pending.is_empty() {
            counters += self.flush(pending).await;
        }

        info!(
            worker,
            found = counters.found,
            indexed = counters.indexed,
            failed = counters.failed,
            "indexing worker finished"
        );
        Ok(counters)
    }

    async fn flush(&self, batch: Vec<Record>) -> IndexCounters {
        index_batch(self.index.as_ref(), batch, self.incremental, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_memory::MemoryIndex;
    use crate::traits::BulkResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn record(id: &str, body: &str) -> Record {
        Record {
            id: id.to_string(),
            title: id.to_uppercase(),
            body: body.to_string(),
            url: format!("https://video.example.edu/Panopto/Pages/Viewer.aspx?id={}", id),
            category: vec!["other".to_string()],
            date: "2024-01-01T00:00:00Z".to_string(),
            thumbnail: None,
            permissions: vec![],
            source: "training".to_string(),
        }
    }

    fn records(prefix: &str, n: usize) -> Vec<Record> {
        (0..n).map(|i| record(&format!("{}{}", prefix, i), "x")).collect()
    }

    struct DownIndex;

    #[async_trait]
    impl SearchIndex for DownIndex {
        fn name(&self) -> &str {
            "down"
        }
        async fn existing_ids(&self, _ids: &[String]) -> Result<HashMap<String, String>> {
            anyhow::bail!("connection refused")
        }
        async fn bulk_upsert(&self, _ops: Vec<IndexOp>, _timeout: Duration) -> Result<BulkResponse> {
            anyhow::bail!("request timed out")
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn full_mode_inserts_and_counts_item_failures() {
        let index = MemoryIndex::new();
        index.reject("r1");
        let counters = index_batch(&index, records("r", 3), false, TIMEOUT).await;
        assert_eq!(
            counters,
            IndexCounters {
                found: 0,
                indexed: 2,
                appended: 2,
                updated: 0,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn incremental_mode_merges_existing_documents() {
        let index = MemoryIndex::new();
        index_batch(&index, vec![record("a", "old")], false, TIMEOUT).await;

        let counters = index_batch(
            &index,
            vec![record("a", "new"), record("b", "fresh")],
            true,
            TIMEOUT,
        )
        .await;
        assert_eq!(counters.updated, 1);
        assert_eq!(counters.appended, 1);
        assert_eq!(counters.indexed, 2);
        assert_eq!(index.count_logical("a"), 1);
        assert_eq!(index.get_logical("a").unwrap()["body"], "new");
    }

    #[tokio::test]
    async fn failed_calls_count_the_whole_batch() {
        let full = index_batch(&DownIndex, records("r", 4), false, TIMEOUT).await;
        assert_eq!(full.failed, 4);
        assert_eq!(full.indexed, 0);
        let incremental = index_batch(&DownIndex, records("r", 3), true, TIMEOUT).await;
        assert_eq!(incremental.failed, 3);
    }

    #[tokio::test]
    async fn remainder_is_flushed_on_end_signal() {
        let queue = HandoffQueue::unbounded();
        let index = Arc::new(MemoryIndex::new());
        queue.push(records("a", 60)).await;
        queue.push(records("b", 90)).await;
        queue.end_signal().await;

        let worker = IndexWorker::new(queue, index.clone(), 100, false, TIMEOUT);
        let counters = worker.run(0).await.unwrap();
        assert_eq!(counters.found, 150);
        assert_eq!(counters.indexed, 150);
        assert_eq!(index.batch_sizes(), vec![100, 50]);
    }

    #[tokio::test]
    async fn exact_multiple_sends_no_trailing_batch() {
        let queue = HandoffQueue::unbounded();
        let index = Arc::new(MemoryIndex::new());
        queue.push(records("a", 200)).await;
        queue.end_signal().await;

        let worker = IndexWorker::new(queue, index.clone(), 100, false, TIMEOUT);
        worker.run(0).await.unwrap();
        assert_eq!(index.batch_sizes(), vec![100, 100]);
    }

    #[tokio::test]
    async fn end_signal_alone_sends_nothing() {
        let queue = HandoffQueue::unbounded();
        let index = Arc::new(MemoryIndex::new());
        queue.end_signal().await;
        let counters = IndexWorker::new(queue, index.clone(), 100, true, TIMEOUT)
            .run(0)
            .await
            .unwrap();
        assert_eq!(counters, IndexCounters::default());
        assert!(index.batch_sizes().is_empty());
    }
}
