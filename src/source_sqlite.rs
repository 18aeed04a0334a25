//! SQLite-backed source collaborator.
//!
//! Reads a mirror of the video platform's session tables. Session start
//! times are stored in the platform's native encoding: fractional seconds
//! since `1600-12-31T00:00:00Z`. Partition bounds are converted into that
//! encoding before querying and row times are converted back.
//!
//! Only live (`life_cycle_state = 0`) public sessions are returned, one row
//! per delivery.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::db;
use crate::models::{EventTarget, RawAttachment, RawRecord, Slide, TimeRange, TimedText};
use crate::traits::RecordSource;

/// Seconds between the platform epoch (1600-12-31) and the Unix epoch.
const PLATFORM_EPOCH_OFFSET_SECS: i64 = 11_644_560_000;

fn platform_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH - TimeDelta::seconds(PLATFORM_EPOCH_OFFSET_SECS)
}

/// Timestamp → seconds since 1600-12-31, millisecond precision.
pub fn to_source_seconds(ts: DateTime<Utc>) -> f64 {
    (ts - platform_epoch()).num_milliseconds() as f64 / 1000.0
}

/// Seconds since 1600-12-31 → timestamp. `None` when out of range.
pub fn from_source_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)?;
    platform_epoch().checked_add_signed(millis)
}

/// Tables of the mirror, created by tests and by tooling that fills it.
pub const SOURCE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY,
        public_id TEXT NOT NULL UNIQUE,
        long_name TEXT,
        abstract TEXT,
        start_time REAL NOT NULL,
        life_cycle_state INTEGER NOT NULL DEFAULT 0,
        is_public INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deliveries (
        public_id TEXT PRIMARY KEY,
        session_id INTEGER NOT NULL REFERENCES sessions(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event_targets (
        id INTEGER PRIMARY KEY,
        session_id INTEGER NOT NULL REFERENCES sessions(id),
        event_target_type INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS captions (
        event_target_id INTEGER NOT NULL REFERENCES event_targets(id),
        data TEXT,
        stream_relative_seconds REAL NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        event_target_id INTEGER NOT NULL REFERENCES event_targets(id),
        caption TEXT,
        time REAL NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS slide_events (
        event_target_id INTEGER NOT NULL REFERENCES event_targets(id),
        title TEXT,
        content TEXT,
        absolute_seconds REAL NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attachments (
        session_id INTEGER NOT NULL REFERENCES sessions(id),
        path TEXT NOT NULL,
        file_path TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time)",
];

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SOURCE_SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub struct SqliteSource {
    name: String,
    pool: SqlitePool,
}

impl SqliteSource {
    pub fn from_pool(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// Open the mirror, retrying with `2^attempt` second sleeps up to
    /// `retry_count` attempts.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match db::connect_read_only(&config.db_path).await {
                Ok(pool) => return Ok(Self::from_pool(config.name.clone(), pool)),
                Err(e) if attempt < config.retry_count => {
                    let delay = Duration::from_secs(1 << attempt.min(5));
                    warn!(
                        attempt,
                        retry_count = config.retry_count,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "source connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Failed to open source database {} after {} attempt(s)",
                        config.db_path.display(),
                        attempt
                    )))
                }
            }
        }
    }

    async fn fetch_event_targets(&self, session_id: i64) -> Result<Vec<EventTarget>> {
        let rows = sqlx::query(
            "SELECT id FROM event_targets WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let captions = sqlx::query(
                r#"
                SELECT data, stream_relative_seconds FROM captions
                WHERE event_target_id = ?
                ORDER BY stream_relative_seconds
                "#,
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| TimedText {
                offset_secs: r.get("stream_relative_seconds"),
                text: r.get("data"),
            })
            .collect();

            let events = sqlx::query(
                "SELECT caption, time FROM events WHERE event_target_id = ? ORDER BY time",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| TimedText {
                offset_secs: r.get("time"),
                text: r.get("caption"),
            })
            .collect();

            let slides = sqlx::query(
                r#"
                SELECT title, content, absolute_seconds FROM slide_events
                WHERE event_target_id = ?
                ORDER BY absolute_seconds
                "#,
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| Slide {
                offset_secs: r.get("absolute_seconds"),
                title: r.get("title"),
                content: r.get("content"),
            })
            .collect();

            targets.push(EventTarget {
                id,
                captions,
                events,
                slides,
            });
        }
        Ok(targets)
    }

    async fn fetch_attachments(&self, session_id: i64) -> Result<Vec<RawAttachment>> {
        let rows = sqlx::query(
            "SELECT path, file_path FROM attachments WHERE session_id = ? ORDER BY rowid",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| RawAttachment {
                path: r.get("path"),
                file_path: PathBuf::from(r.get::<String, _>("file_path")),
            })
            .collect())
    }
}

#[async_trait]
impl RecordSource for SqliteSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_records(&self, range: &TimeRange) -> Result<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                d.public_id AS delivery_public_id,
                s.id AS session_id,
                s.public_id AS session_public_id,
                s.long_name,
                s.abstract,
                s.start_time
            FROM deliveries d
            INNER JOIN sessions s ON s.id = d.session_id
            WHERE s.life_cycle_state = 0
              AND s.is_public = 1
              AND s.start_time >= ?
              AND s.start_time < ?
            ORDER BY s.start_time, d.public_id
            "#,
        )
        .bind(to_source_seconds(range.start))
        .bind(to_source_seconds(range.end))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to query sessions in {}", range))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let session_id: i64 = row.get("session_id");
            let public_id: String = row.get("delivery_public_id");
            let native: f64 = row.get("start_time");
            let Some(start_time) = from_source_seconds(native) else {
                warn!(record = %public_id, start_time = native, "skipping row with unrepresentable start time");
                continue;
            };
            records.push(RawRecord {
                public_id,
                session_public_id: row.get("session_public_id"),
                title: row.get("long_name"),
                abstract_text: row.get("abstract"),
                start_time,
                event_targets: self.fetch_event_targets(session_id).await?,
                attachments: self.fetch_attachments(session_id).await?,
            });
        }
        debug!(partition = %range, rows = records.len(), "fetched source rows");
        Ok(records)
    }
}
