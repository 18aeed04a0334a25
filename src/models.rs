//! Core data models used throughout the sync pipeline.
//!
//! Raw rows come out of a [`crate::traits::RecordSource`] as [`RawRecord`]s,
//! are turned into [`Record`]s by the extraction workers, travel through the
//! hand-off queue in batches and reach the index as [`IndexOp`]s.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Which kind of job produced (or reads) a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Full,
    Incremental,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Full => "full",
            JobType::Incremental => "incremental",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(JobType::Full),
            "incremental" => Some(JobType::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A half-open `[start, end)` window with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(SyncError::InvalidRange {
                start,
                end,
                partitions: 1,
            });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// One timed text fragment (a caption line or a primary-stream event).
#[derive(Debug, Clone, PartialEq)]
pub struct TimedText {
    pub offset_secs: f64,
    pub text: Option<String>,
}

/// One slide shown during a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    pub offset_secs: f64,
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Captions, events and slides attached to one event target of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTarget {
    pub id: i64,
    pub captions: Vec<TimedText>,
    pub events: Vec<TimedText>,
    pub slides: Vec<Slide>,
}

/// A file attached to a session that may be sent through OCR.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttachment {
    /// Portal path, e.g. `/Sections/View?sectionID=12&attachmentID=7`.
    pub path: String,
    /// Where the bytes live on local storage.
    pub file_path: std::path::PathBuf,
}

/// Row produced by the source collaborator before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Delivery public id; becomes [`Record::id`].
    pub public_id: String,
    pub session_public_id: String,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub start_time: DateTime<Utc>,
    pub event_targets: Vec<EventTarget>,
    pub attachments: Vec<RawAttachment>,
}

/// Normalized document written to the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub category: Vec<String>,
    pub date: String,
    pub thumbnail: Option<String>,
    pub permissions: Vec<String>,
    pub source: String,
}

/// Job-level manifest: record id → canonical URL.
pub type GlobalKeys = BTreeMap<String, String>;

/// One operation in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOp {
    /// New document; the index assigns its internal identifier.
    Insert(Record),
    /// Merge `partial_doc` into the existing document `id` (internal id).
    Update {
        id: String,
        partial_doc: serde_json::Value,
    },
}

impl IndexOp {
    /// Logical record id carried by this op, for error reporting.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            IndexOp::Insert(record) => Some(record.id.as_str()),
            IndexOp::Update { partial_doc, .. } => partial_doc.get("id").and_then(|v| v.as_str()),
        }
    }
}

/// Durable "synced up to" marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub job_type: JobType,
    pub source: String,
    pub last_end_time: DateTime<Utc>,
}

/// Aggregate statistics returned by a job and printed as JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_documents_found: u64,
    pub total_documents_indexed: u64,
    pub total_documents_appended: u64,
    pub total_documents_updated: u64,
    pub total_documents_failed: u64,
}

/// Formats a timestamp the way checkpoints and record dates store it.
pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_rfc3339(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
