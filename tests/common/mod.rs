//! Shared fixtures: a throwaway source mirror seeded with sessions.

#![allow(dead_code)]

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use panopto_sync::models::parse_rfc3339;
use panopto_sync::source_sqlite::{create_schema, to_source_seconds};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

pub async fn open_source_db(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    pool
}

/// Insert a live public session with one delivery `del-{id}` and one
/// caption line.
pub async fn add_session(pool: &SqlitePool, id: i64, start: DateTime<Utc>) {
    sqlx::query(
        "INSERT INTO sessions (id, public_id, long_name, abstract, start_time) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(format!("sess-{}", id))
    .bind(format!("Lecture {}", id))
    .bind("<p>Weekly lecture</p>")
    .bind(to_source_seconds(start))
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO deliveries (public_id, session_id) VALUES (?, ?)")
        .bind(format!("del-{}", id))
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO event_targets (id, session_id, event_target_type) VALUES (?, ?, 0)")
        .bind(id)
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO captions (event_target_id, data, stream_relative_seconds) VALUES (?, ?, 1.0)")
        .bind(id)
        .bind(format!("caption for {}", id))
        .execute(pool)
        .await
        .unwrap();
}

/// 150 sessions on 2024-01-01: 90 before noon, 60 after.
pub async fn seed_150(pool: &SqlitePool) {
    let morning = parse_rfc3339("2024-01-01T00:00:00Z").unwrap();
    for i in 0..90 {
        add_session(pool, i, morning + Duration::minutes(7 * i)).await;
    }
    let afternoon = parse_rfc3339("2024-01-01T12:00:00Z").unwrap();
    for i in 0..60 {
        add_session(pool, 90 + i, afternoon + Duration::minutes(10 * i)).await;
    }
}

pub async fn seed_150_at(path: &Path) {
    let pool = open_source_db(path).await;
    seed_150(&pool).await;
    pool.close().await;
}
