//! End-to-end tests of the sync pipeline against a seeded SQLite source,
//! the in-process index and a real state database.

mod common;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use panopto_sync::checkpoint::CheckpointStore;
use panopto_sync::config::{parse_config, Config};
use panopto_sync::error::SyncError;
use panopto_sync::index_memory::MemoryIndex;
use panopto_sync::models::{
    format_rfc3339, parse_rfc3339, Checkpoint, GlobalKeys, IndexOp, JobType, RawRecord, TimeRange,
};
use panopto_sync::ocr::DisabledOcr;
use panopto_sync::producer::ExtractSettings;
use panopto_sync::rules::IndexingRules;
use panopto_sync::source_sqlite::SqliteSource;
use panopto_sync::sync::{run_job, Collaborators, SyncJob, SyncOptions, SyncState};
use panopto_sync::traits::{BulkResponse, RecordSource, SearchIndex};
use tempfile::TempDir;

// ─── Fixtures ───────────────────────────────────────────────────────

struct Env {
    _tmp: TempDir,
    config: Config,
}

fn config_for(root: &Path) -> Config {
    parse_config(&format!(
        r#"
[state]
path = "{root}/state/state.sqlite"

[source]
db_path = "{root}/panopto.sqlite"
host_url = "https://video.example.edu"
retry_count = 1

[index]
backend = "memory"

[sync]
start_time = "2024-01-01T00:00:00Z"
end_time = "2024-01-02T00:00:00Z"
producer_threads = 2
consumer_threads = 2
queue_capacity = 4
"#,
        root = root.display()
    ))
    .unwrap()
}

async fn seeded_env() -> Env {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    common::seed_150_at(&config.source.db_path).await;
    Env { _tmp: tmp, config }
}

async fn collaborators(config: &Config, index: Arc<dyn SearchIndex>) -> Collaborators {
    let source = SqliteSource::connect(&config.source).await.unwrap();
    collaborators_with(Arc::new(source), index)
}

fn collaborators_with(source: Arc<dyn RecordSource>, index: Arc<dyn SearchIndex>) -> Collaborators {
    Collaborators {
        source,
        ocr: Arc::new(DisabledOcr),
        index,
        rules: Arc::new(IndexingRules::default()),
        settings: Arc::new(
            ExtractSettings::new("https://video.example.edu", None, "training", BTreeMap::new())
                .unwrap(),
        ),
    }
}

fn options(config: &Config, job_type: JobType) -> SyncOptions {
    SyncOptions::from_config(config, job_type).unwrap()
}

fn day_end() -> chrono::DateTime<chrono::Utc> {
    parse_rfc3339("2024-01-02T00:00:00Z").unwrap()
}

struct OfflineSource;

#[async_trait]
impl RecordSource for OfflineSource {
    fn name(&self) -> &str {
        "offline"
    }
    async fn fetch_records(&self, _range: &TimeRange) -> Result<Vec<RawRecord>> {
        anyhow::bail!("login timeout expired")
    }
}

/// Fails every bulk call as a whole.
struct TimingOutIndex;

#[async_trait]
impl SearchIndex for TimingOutIndex {
    fn name(&self) -> &str {
        "timing-out"
    }
    async fn existing_ids(&self, _ids: &[String]) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
    async fn bulk_upsert(&self, _ops: Vec<IndexOp>, timeout: Duration) -> Result<BulkResponse> {
        anyhow::bail!("bulk request exceeded {:?}", timeout)
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn full_sync_of_150_records_with_one_injected_failure() {
    let env = seeded_env().await;
    let index = Arc::new(MemoryIndex::new());
    index.reject("del-7");
    let store = CheckpointStore::open(&env.config).await.unwrap();

    let mut job = SyncJob::new(
        collaborators(&env.config, index.clone()).await,
        store.clone(),
        options(&env.config, JobType::Full),
    );
    let stats = job.run().await.unwrap();

    assert_eq!(job.state(), SyncState::Done);
    assert_eq!(stats.total_documents_found, 150);
    assert_eq!(stats.total_documents_indexed, 149);
    assert_eq!(stats.total_documents_appended, 149);
    assert_eq!(stats.total_documents_updated, 0);
    assert_eq!(stats.total_documents_failed, 1);

    let batches = index.batch_sizes();
    assert!(batches.iter().all(|&b| b > 0 && b <= 100), "{:?}", batches);
    assert_eq!(batches.iter().sum::<usize>(), 150);
    assert_eq!(index.len(), 149);

    let doc = index.get_logical("del-100").unwrap();
    assert_eq!(doc["title"], "Lecture 100");
    assert_eq!(doc["body"], "Lecture 100\nWeekly lecture\ncaption for 100");
    assert_eq!(
        doc["url"],
        "https://video.example.edu/Panopto/Pages/Viewer.aspx?id=del-100"
    );
    assert_eq!(doc["date"], "2024-01-01T13:40:00Z");
    assert_eq!(doc["source"], "training");

    let cp = store.get(JobType::Full, "panopto").await.unwrap().unwrap();
    assert_eq!(format_rfc3339(cp.last_end_time), "2024-01-02T00:00:00Z");
    assert_eq!(store.global_key_count("panopto").await.unwrap(), 150);
}

#[tokio::test]
async fn single_consumer_flushes_full_batch_then_remainder() {
    let env = seeded_env().await;
    let index = Arc::new(MemoryIndex::new());
    let store = CheckpointStore::open(&env.config).await.unwrap();
    let mut opts = options(&env.config, JobType::Full);
    opts.consumer_threads = 1;

    let mut job = SyncJob::new(collaborators(&env.config, index.clone()).await, store, opts);
    let stats = job.run().await.unwrap();

    assert_eq!(stats.total_documents_indexed, 150);
    assert_eq!(index.batch_sizes(), vec![100, 50]);
}

#[tokio::test]
async fn rerunning_an_uncommitted_incremental_window_does_not_duplicate() {
    let env = seeded_env().await;
    let index = Arc::new(MemoryIndex::new());
    let store = CheckpointStore::open(&env.config).await.unwrap();

    // First attempt dies before its checkpoint is written.
    let mut crashed = options(&env.config, JobType::Incremental);
    crashed.commit = false;
    let first = SyncJob::new(collaborators(&env.config, index.clone()).await, store.clone(), crashed)
        .run()
        .await
        .unwrap();
    assert_eq!(first.total_documents_appended, 150);
    assert_eq!(store.get(JobType::Incremental, "panopto").await.unwrap(), None);

    let second = SyncJob::new(
        collaborators(&env.config, index.clone()).await,
        store.clone(),
        options(&env.config, JobType::Incremental),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(second.total_documents_found, 150);
    assert_eq!(second.total_documents_updated, 150);
    assert_eq!(second.total_documents_appended, 0);
    assert_eq!(index.len(), 150);
    for id in ["del-0", "del-89", "del-149"] {
        assert_eq!(index.count_logical(id), 1, "{} duplicated", id);
    }

    let cp = store.get(JobType::Incremental, "panopto").await.unwrap().unwrap();
    assert_eq!(cp.last_end_time, day_end());
}

#[tokio::test]
async fn incremental_resumes_from_full_checkpoint() {
    let env = seeded_env().await;
    let store = CheckpointStore::open(&env.config).await.unwrap();
    store
        .commit(
            &Checkpoint {
                job_type: JobType::Full,
                source: "panopto".to_string(),
                last_end_time: parse_rfc3339("2024-01-01T12:00:00Z").unwrap(),
            },
            &GlobalKeys::new(),
        )
        .await
        .unwrap();

    let index = Arc::new(MemoryIndex::new());
    let stats = SyncJob::new(
        collaborators(&env.config, index.clone()).await,
        store,
        options(&env.config, JobType::Incremental),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.total_documents_found, 60);
    assert!(index.get_logical("del-89").is_none());
    assert!(index.get_logical("del-90").is_some());
}

#[tokio::test]
async fn failed_extraction_leaves_previous_checkpoint_untouched() {
    let env = seeded_env().await;
    let store = CheckpointStore::open(&env.config).await.unwrap();
    let previous = Checkpoint {
        job_type: JobType::Full,
        source: "panopto".to_string(),
        last_end_time: parse_rfc3339("2023-12-01T00:00:00Z").unwrap(),
    };
    store.commit(&previous, &GlobalKeys::new()).await.unwrap();

    let mut job = SyncJob::new(
        collaborators_with(Arc::new(OfflineSource), Arc::new(MemoryIndex::new())),
        store.clone(),
        options(&env.config, JobType::Full),
    );
    let err = job.run().await.unwrap_err();

    assert!(matches!(err, SyncError::Extraction { failed: 2, total: 2 }));
    assert_eq!(job.state(), SyncState::Failed);
    assert_eq!(
        store.get(JobType::Full, "panopto").await.unwrap(),
        Some(previous)
    );
}

#[tokio::test]
async fn bulk_timeouts_count_as_failures_but_job_completes() {
    let env = seeded_env().await;
    let store = CheckpointStore::open(&env.config).await.unwrap();
    let mut job = SyncJob::new(
        collaborators(&env.config, Arc::new(TimingOutIndex)).await,
        store.clone(),
        options(&env.config, JobType::Full),
    );
    let stats = job.run().await.unwrap();

    assert_eq!(stats.total_documents_found, 150);
    assert_eq!(stats.total_documents_indexed, 0);
    assert_eq!(stats.total_documents_failed, 150);
    assert!(store.get(JobType::Full, "panopto").await.unwrap().is_some());
}

#[tokio::test]
async fn many_consumers_with_tiny_queue_all_terminate() {
    let env = seeded_env().await;
    let store = CheckpointStore::open(&env.config).await.unwrap();
    let mut opts = options(&env.config, JobType::Full);
    opts.producer_threads = 8;
    opts.consumer_threads = 6;
    opts.queue_capacity = 1;
    opts.batch_size = 7;

    let index = Arc::new(MemoryIndex::new());
    let mut job = SyncJob::new(collaborators(&env.config, index.clone()).await, store, opts);
    let run = job.run();
    let stats = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("job did not terminate")
        .unwrap();

    assert_eq!(stats.total_documents_found, 150);
    assert_eq!(stats.total_documents_indexed, 150);
    assert!(index.batch_sizes().iter().all(|&b| b <= 7));
}

#[tokio::test]
async fn run_job_builds_collaborators_from_config() {
    let env = seeded_env().await;

    let stats = run_job(&env.config, JobType::Full, false).await.unwrap();
    assert_eq!(stats.total_documents_found, 150);
    assert_eq!(stats.total_documents_indexed, 150);

    let store = CheckpointStore::open(&env.config).await.unwrap();
    assert_eq!(
        store.get(JobType::Full, "panopto").await.unwrap().map(|c| c.last_end_time),
        Some(day_end())
    );
}

#[tokio::test]
async fn dry_run_writes_no_checkpoint() {
    let env = seeded_env().await;
    let stats = run_job(&env.config, JobType::Incremental, true).await.unwrap();
    assert_eq!(stats.total_documents_found, 150);

    let store = CheckpointStore::open(&env.config).await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_source_is_a_source_error() {
    let tmp = TempDir::new().unwrap();
    let config = config_for(tmp.path());
    let err = run_job(&config, JobType::Full, false).await.unwrap_err();
    assert!(matches!(err, SyncError::Source(_)));
}
