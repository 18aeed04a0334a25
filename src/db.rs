//! SQLite connections.
//!
//! Two databases are involved in a job: the state database, owned by this
//! tool and created on demand, and the source mirror, which is only read.

use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Open the state database (checkpoints and job manifest), creating it and
/// its parent directory if needed.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.state.path;

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = options_for(db_path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open an existing database read-only. Never creates the file.
pub async fn connect_read_only(db_path: &Path) -> Result<SqlitePool> {
    if !db_path.is_file() {
        bail!("database {} does not exist", db_path.display());
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options_for(db_path)?.read_only(true))
        .await?;

    Ok(pool)
}

fn options_for(db_path: &Path) -> Result<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(&format!(
        "sqlite:{}",
        db_path.display()
    ))?)
}
