use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the state tables if they do not exist yet.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per (job type, source); last_end_time is RFC 3339.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            job_type TEXT NOT NULL,
            source TEXT NOT NULL,
            last_end_time TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (job_type, source)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Record id → canonical URL, written alongside each checkpoint.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS global_keys (
            source TEXT NOT NULL,
            record_id TEXT NOT NULL,
            url TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (source, record_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_global_keys_source ON global_keys(source)")
        .execute(pool)
        .await?;

    Ok(())
}
