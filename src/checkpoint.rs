//! Durable checkpoints and the job manifest.
//!
//! Checkpoints are keyed by `(job_type, source)` and hold the RFC 3339 end
//! of the last window that was fully extracted and indexed. The manifest
//! (`record id → url`) of a job is written in the same transaction, so a
//! reader never sees a checkpoint without the manifest that produced it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{format_rfc3339, parse_rfc3339, Checkpoint, GlobalKeys, JobType};

/// A checkpoint row with its write time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCheckpoint {
    pub checkpoint: Checkpoint,
    /// Unix seconds.
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the state database and make sure its tables exist.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn get(&self, job_type: JobType, source: &str) -> Result<Option<Checkpoint>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT last_end_time FROM checkpoints WHERE job_type = ? AND source = ?",
        )
        .bind(job_type.as_str())
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        value
            .map(|s| -> Result<Checkpoint> {
                Ok(Checkpoint {
                    job_type,
                    source: source.to_string(),
                    last_end_time: parse_stored(&s)?,
                })
            })
            .transpose()
    }

    /// Most recent `last_end_time` for `source` across job types.
    pub async fn latest(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let values: Vec<String> =
            sqlx::query_scalar("SELECT last_end_time FROM checkpoints WHERE source = ?")
                .bind(source)
                .fetch_all(&self.pool)
                .await?;

        let mut latest = None;
        for value in values {
            let ts = parse_stored(&value)?;
            if latest.map_or(true, |l| ts > l) {
                latest = Some(ts);
            }
        }
        Ok(latest)
    }

    pub async fn list(&self) -> Result<Vec<StoredCheckpoint>> {
        let rows = sqlx::query(
            "SELECT job_type, source, last_end_time, updated_at FROM checkpoints ORDER BY source, job_type",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let job_type: String = row.get("job_type");
            let Some(job_type) = JobType::parse(&job_type) else {
                anyhow::bail!("Unknown job type in checkpoints table: {}", job_type);
            };
            let last_end_time: String = row.get("last_end_time");
            stored.push(StoredCheckpoint {
                checkpoint: Checkpoint {
                    job_type,
                    source: row.get("source"),
                    last_end_time: parse_stored(&last_end_time)?,
                },
                updated_at: row.get("updated_at"),
            });
        }
        Ok(stored)
    }

    pub async fn global_key_count(&self, source: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM global_keys WHERE source = ?")
            .bind(source)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Write the checkpoint and upsert the manifest atomically.
    pub async fn commit(&self, checkpoint: &Checkpoint, keys: &GlobalKeys) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (job_type, source, last_end_time, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(job_type, source) DO UPDATE SET
                last_end_time = excluded.last_end_time,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(checkpoint.job_type.as_str())
        .bind(&checkpoint.source)
        .bind(format_rfc3339(checkpoint.last_end_time))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (record_id, url) in keys {
            sqlx::query(
                r#"
                INSERT INTO global_keys (source, record_id, url, updated_at) VALUES (?, ?, ?, ?)
                ON CONFLICT(source, record_id) DO UPDATE SET
                    url = excluded.url,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&checkpoint.source)
            .bind(record_id)
            .bind(url)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn parse_stored(value: &str) -> Result<DateTime<Utc>> {
    parse_rfc3339(value).with_context(|| format!("Corrupt checkpoint timestamp: {}", value))
}
