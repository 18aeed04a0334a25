//! Checkpoint and manifest overview.
//!
//! `panopto-sync status` shows where each job type of each source will
//! resume, how long ago it was written and how many records the manifest
//! holds. Useful after a failed run to confirm the checkpoint did not move.

use anyhow::Result;

use crate::checkpoint::{CheckpointStore, StoredCheckpoint};
use crate::config::Config;
use crate::models::format_rfc3339;

/// Run the status command: read the state database and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = CheckpointStore::open(config).await?;
    let checkpoints = store.list().await?;
    let manifest = store.global_key_count(&config.source.name).await?;
    store.close().await;

    print!(
        "{}",
        render_status(config, &checkpoints, manifest, chrono::Utc::now().timestamp())
    );
    Ok(())
}

pub fn render_status(config: &Config, checkpoints: &[StoredCheckpoint], manifest: i64, now: i64) -> String {
    let mut out = String::new();
    out.push_str("Panopto Sync Status\n");
    out.push_str("===================\n\n");
    out.push_str(&format!("  State DB:    {}\n", config.state.path.display()));
    out.push_str(&format!("  Source:      {}\n", config.source.name));
    out.push_str(&format!("  Index:       {}\n", describe_index(config)));
    out.push_str(&format!("  Manifest:    {} record(s)\n\n", manifest));

    if checkpoints.is_empty() {
        out.push_str("  No checkpoints yet. Run `panopto-sync full-sync` first.\n");
        return out;
    }

    out.push_str(&format!(
        "  {:<16} {:<12} {:<22}   {}\n",
        "SOURCE", "JOB", "SYNCED UP TO", "WRITTEN"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(68)));
    for stored in checkpoints {
        let cp = &stored.checkpoint;
        out.push_str(&format!(
            "  {:<16} {:<12} {:<22}   {}\n",
            cp.source,
            cp.job_type.as_str(),
            format_rfc3339(cp.last_end_time),
            format_ts_relative(stored.updated_at, now)
        ));
    }
    out
}

fn describe_index(config: &Config) -> String {
    match config.index.backend.as_str() {
        "elasticsearch" => format!("elasticsearch {}/{}", config.index.host_url, config.index.index),
        other => other.to_string(),
    }
}

/// Format a Unix timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
