//! Error taxonomy for sync jobs.
//!
//! Collaborator implementations report failures with `anyhow` and the
//! orchestrator maps them onto [`SyncError`] at its boundary, so callers of
//! [`crate::sync::run_job`] can branch on the kind without string matching.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// One or more configuration fields are missing or invalid.
    #[error("Invalid configuration: {}", .errors.join("; "))]
    Config { errors: Vec<String> },

    /// A time window could not be partitioned.
    #[error("Invalid time range: cannot split [{start}, {end}) into {partitions} partition(s)")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        partitions: usize,
    },

    /// Every partition of the extraction phase failed.
    #[error("Extraction failed for {failed} of {total} partition(s); checkpoint not saved")]
    Extraction { failed: usize, total: usize },

    /// The indexing phase raised (a consumer crashed or the queue broke).
    #[error("Indexing failed: {0}; checkpoint not saved")]
    Indexing(String),

    /// Reading or committing the checkpoint failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The source collaborator could not be reached.
    #[error("Source error: {0}")]
    Source(String),

    /// The capability exists in the interface but is not implemented.
    #[error("{0} is not supported by this connector")]
    Unsupported(&'static str),
}

impl SyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            errors: vec![msg.into()],
        }
    }

    /// True for the failure kinds that abort before any worker starts.
    pub fn is_fatal_before_start(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidRange { .. })
    }
}
