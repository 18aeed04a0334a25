//! Sync orchestrator.
//!
//! A job walks a fixed state machine:
//!
//! ```text
//! INIT → CHECKPOINT_READ → PARTITION → EXTRACT → DRAIN_SIGNAL → INDEX
//!      → CHECKPOINT_COMMIT → DONE
//!                    (EXTRACT | INDEX | CHECKPOINT_*) → FAILED
//! ```
//!
//! The consumer pool is started before extraction so a bounded hand-off
//! queue always has readers. End signals (one per consumer) are pushed only
//! after every producer has joined, and the checkpoint is committed only
//! after every consumer has joined.
//!
//! Producers and consumers return their own results (`id → url` maps and
//! [`IndexCounters`]); all merging happens here, on the orchestrator task,
//! after the join.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::consumer::{IndexCounters, IndexWorker};
use crate::error::{Result, SyncError};
use crate::index_elastic::ElasticIndex;
use crate::index_memory::MemoryIndex;
use crate::models::{Checkpoint, GlobalKeys, JobType, SyncStats, TimeRange};
use crate::ocr::create_ocr;
use crate::partition::partition;
use crate::pool::{PoolOutcome, WorkerPool};
use crate::producer::{ExtractSettings, Extractor};
use crate::queue::HandoffQueue;
use crate::rules::IndexingRules;
use crate::source_sqlite::SqliteSource;
use crate::traits::{OcrEngine, RecordSource, SearchIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Init,
    CheckpointRead,
    Partition,
    Extract,
    DrainSignal,
    Index,
    CheckpointCommit,
    Done,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Init => "INIT",
            SyncState::CheckpointRead => "CHECKPOINT_READ",
            SyncState::Partition => "PARTITION",
            SyncState::Extract => "EXTRACT",
            SyncState::DrainSignal => "DRAIN_SIGNAL",
            SyncState::Index => "INDEX",
            SyncState::CheckpointCommit => "CHECKPOINT_COMMIT",
            SyncState::Done => "DONE",
            SyncState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Everything a job needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn RecordSource>,
    pub ocr: Arc<dyn OcrEngine>,
    pub index: Arc<dyn SearchIndex>,
    pub rules: Arc<IndexingRules>,
    pub settings: Arc<ExtractSettings>,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub job_type: JobType,
    /// Checkpoint key.
    pub source_name: String,
    /// Window start for full jobs, and for incremental jobs without a
    /// checkpoint.
    pub default_start: DateTime<Utc>,
    /// Window end; `None` means the time the job reads its checkpoint.
    pub end: Option<DateTime<Utc>>,
    pub producer_threads: usize,
    pub consumer_threads: usize,
    /// `0` means unbounded.
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub index_timeout: Duration,
    /// Write the checkpoint and manifest on success.
    pub commit: bool,
}

impl SyncOptions {
    pub fn from_config(config: &Config, job_type: JobType) -> Result<Self> {
        Ok(Self {
            job_type,
            source_name: config.source.name.clone(),
            default_start: config.sync.start()?,
            end: config.sync.end()?,
            producer_threads: config.sync.producer_threads,
            consumer_threads: config.sync.consumer_threads,
            queue_capacity: config.sync.queue_capacity,
            batch_size: config.index.batch_size,
            index_timeout: config.index.timeout(),
            commit: true,
        })
    }
}

pub struct SyncJob {
    collaborators: Collaborators,
    checkpoints: CheckpointStore,
    options: SyncOptions,
    state: SyncState,
}

impl SyncJob {
    pub fn new(collaborators: Collaborators, checkpoints: CheckpointStore, options: SyncOptions) -> Self {
        Self {
            collaborators,
            checkpoints,
            options,
            state: SyncState::Init,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn transition(&mut self, next: SyncState) {
        info!(job = %self.options.job_type, from = %self.state, to = %next, "sync state");
        self.state = next;
    }

    /// Run the job to `DONE` or `FAILED`.
    pub async fn run(&mut self) -> Result<SyncStats> {
        match self.execute().await {
            Ok(stats) => {
                self.transition(SyncState::Done);
                Ok(stats)
            }
            Err(e) => {
                self.transition(SyncState::Failed);
                error!(job = %self.options.job_type, error = %e, "sync job failed");
                Err(e)
            }
        }
    }

    /// Window this job covers, from the checkpoint store and options.
    pub async fn window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = match self.options.job_type {
            JobType::Full => self.options.default_start,
            JobType::Incremental => self
                .checkpoints
                .latest(&self.options.source_name)
                .await
                .map_err(|e| SyncError::Checkpoint(format!("{:#}", e)))?
                .unwrap_or(self.options.default_start),
        };
        let end = self.options.end.unwrap_or_else(Utc::now);
        Ok((start, end))
    }

    async fn execute(&mut self) -> Result<SyncStats> {
        let job_type = self.options.job_type;

        self.transition(SyncState::CheckpointRead);
        let (start, end) = self.window().await?;
        info!(job = %job_type, source = %self.options.source_name, start = %start, end = %end, "sync window");

        self.transition(SyncState::Partition);
        let partitions = partition(start, end, self.options.producer_threads)?;
        let total_partitions = partitions.len();

        self.transition(SyncState::Extract);
        let queue = HandoffQueue::new(self.options.queue_capacity);
        let consumers = self.spawn_consumers(&queue);
        let extraction = self.extract(&queue, partitions).await;

        self.transition(SyncState::DrainSignal);
        queue.end_signals(self.options.consumer_threads).await;

        self.transition(SyncState::Index);
        let counters = consumers
            .await
            .map_err(|e| SyncError::Indexing(format!("consumer pool panicked: {}", e)))??;

        let leftovers = queue.drain_leftovers();
        if !leftovers.is_empty() {
            warn!(
                end_signals = leftovers.end_signals,
                data_messages = leftovers.data_messages,
                records = leftovers.records,
                "hand-off queue not empty after indexing"
            );
        }

        let failed_partitions = extraction.failures.len();
        if extraction.all_failed() {
            return Err(SyncError::Extraction {
                failed: failed_partitions,
                total: total_partitions,
            });
        }
        if failed_partitions > 0 {
            warn!(
                failed = failed_partitions,
                total = total_partitions,
                "some partitions failed to extract; their records were skipped"
            );
        }

        let stats = SyncStats::from(counters);

        self.transition(SyncState::CheckpointCommit);
        if self.options.commit {
            let checkpoint = Checkpoint {
                job_type,
                source: self.options.source_name.clone(),
                last_end_time: end,
            };
            self.checkpoints
                .commit(&checkpoint, &extraction.merged)
                .await
                .map_err(|e| SyncError::Checkpoint(format!("{:#}", e)))?;
            info!(job = %job_type, last_end_time = %end, manifest = extraction.merged.len(), "checkpoint committed");
        } else {
            info!(job = %job_type, "dry run, checkpoint not written");
        }

        info!(
            found = stats.total_documents_found,
            indexed = stats.total_documents_indexed,
            appended = stats.total_documents_appended,
            updated = stats.total_documents_updated,
            failed = stats.total_documents_failed,
            "sync finished"
        );
        Ok(stats)
    }

    /// Start one indexing worker per configured consumer. The handle
    /// resolves once every worker has read its end signal.
    fn spawn_consumers(&self, queue: &HandoffQueue) -> tokio::task::JoinHandle<Result<IndexCounters>> {
        let pool = WorkerPool::new("consumers", self.options.consumer_threads);
        let queue = queue.clone();
        let index = Arc::clone(&self.collaborators.index);
        let batch_size = self.options.batch_size;
        let incremental = self.options.job_type == JobType::Incremental;
        let timeout = self.options.index_timeout;

        tokio::spawn(async move {
            let outcome = pool
                .run(
                    (0..pool.size()).collect(),
                    move |_, worker| {
                        let worker_task =
                            IndexWorker::new(queue.clone(), Arc::clone(&index), batch_size, incremental, timeout);
                        async move { worker_task.run(worker).await }
                    },
                    IndexCounters::default(),
                    |acc, counters| *acc += counters,
                )
                .await;
            if !outcome.failures.is_empty() {
                let errors: Vec<String> = outcome.failures.iter().map(|f| f.error.clone()).collect();
                return Err(SyncError::Indexing(errors.join("; ")));
            }
            Ok(outcome.merged)
        })
    }

    /// Run one extraction worker per partition. The merged outcome carries
    /// the manifest and the partitions that failed.
    async fn extract(&self, queue: &HandoffQueue, partitions: Vec<TimeRange>) -> PoolOutcome<GlobalKeys> {
        let c = &self.collaborators;
        let extractor = Extractor::new(
            Arc::clone(&c.source),
            Arc::clone(&c.ocr),
            Arc::clone(&c.rules),
            queue.clone(),
            Arc::clone(&c.settings),
        );
        let pool = WorkerPool::new("producers", self.options.producer_threads);
        let outcome = pool
            .run(
                partitions,
                move |_, range| {
                    let extractor = extractor.clone();
                    async move { extractor.run(range).await }
                },
                GlobalKeys::new(),
                |acc, keys| acc.extend(keys),
            )
            .await;
        info!(
            completed = outcome.completed,
            failed = outcome.failures.len(),
            records = outcome.merged.len(),
            "extraction finished"
        );
        outcome
    }
}

/// Build the collaborators a configuration names and run one job.
///
/// With `dry_run`, documents go to an in-process index and no checkpoint is
/// written.
pub async fn run_job(config: &Config, job_type: JobType, dry_run: bool) -> Result<SyncStats> {
    let rules = IndexingRules::new(&config.rules).map_err(|e| SyncError::config(format!("rules: {:#}", e)))?;
    let settings = ExtractSettings::from_config(config)
        .map_err(|e| SyncError::config(format!("source: {:#}", e)))?;
    let ocr = create_ocr(&config.ocr).map_err(|e| SyncError::config(format!("ocr: {:#}", e)))?;
    let index: Arc<dyn SearchIndex> = if dry_run || config.index.backend == "memory" {
        Arc::new(MemoryIndex::new())
    } else {
        Arc::new(
            ElasticIndex::new(&config.index).map_err(|e| SyncError::config(format!("index: {:#}", e)))?,
        )
    };

    let source = SqliteSource::connect(&config.source)
        .await
        .map_err(|e| SyncError::Source(format!("{:#}", e)))?;
    let checkpoints = CheckpointStore::open(config)
        .await
        .map_err(|e| SyncError::Checkpoint(format!("{:#}", e)))?;

    let mut options = SyncOptions::from_config(config, job_type)?;
    options.commit = !dry_run;

    let collaborators = Collaborators {
        source: Arc::new(source),
        ocr,
        index,
        rules: Arc::new(rules),
        settings: Arc::new(settings),
    };

    let mut job = SyncJob::new(collaborators, checkpoints.clone(), options);
    let result = job.run().await;
    checkpoints.close().await;
    result
}
