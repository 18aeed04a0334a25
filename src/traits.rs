//! Collaborator traits.
//!
//! The sync pipeline talks to the outside world through three narrow
//! interfaces:
//!
//! ```text
//!  RecordSource ──▶ producers ──▶ HandoffQueue ──▶ consumers ──▶ SearchIndex
//!                      │
//!                      ▼
//!                  OcrEngine
//! ```
//!
//! Built-in implementations live in [`crate::source_sqlite`], [`crate::ocr`],
//! [`crate::index_elastic`] and [`crate::index_memory`]. Anything else
//! (a different database, a different OCR service) can be plugged in by
//! implementing the trait and handing an `Arc<dyn _>` to
//! [`crate::sync::SyncJob`].

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::SyncError;
use crate::models::{IndexOp, RawRecord, TimeRange};

// ═══════════════════════════════════════════════════════════════════════
// Source
// ═══════════════════════════════════════════════════════════════════════

/// Source of truth for sessions and their derived text.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Every row whose start time falls inside `range` (half-open), with its
    /// captions, events, slides and attachments already attached.
    async fn fetch_records(&self, range: &TimeRange) -> Result<Vec<RawRecord>>;
}

// ═══════════════════════════════════════════════════════════════════════
// OCR
// ═══════════════════════════════════════════════════════════════════════

/// Optical character recognition over raw file bytes.
///
/// Callers treat any error as "no OCR text"; an OCR failure never fails a
/// record or a job.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    /// Recognize text in `bytes`. `file_name` is a hint for the file type;
    /// `language` is a comma-separated list of language codes.
    async fn run_ocr(&self, bytes: Vec<u8>, file_name: &str, language: Option<&str>)
        -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// Search index
// ═══════════════════════════════════════════════════════════════════════

/// One item of a bulk request that the index rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemError {
    /// Logical record id, when known.
    pub record_id: Option<String>,
    pub reason: String,
}

/// Per-item outcome of one bulk call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub inserted: usize,
    pub updated: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkResponse {
    pub fn succeeded(&self) -> usize {
        self.inserted + self.updated
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Look up which logical ids already exist. Returns logical id →
    /// index-internal document id for every id found.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    /// Submit a batch. Per-item failures come back in
    /// [`BulkResponse::errors`]; an `Err` means the whole call failed
    /// (including exceeding `timeout`).
    async fn bulk_upsert(&self, ops: Vec<IndexOp>, timeout: Duration) -> Result<BulkResponse>;

    /// Deletion sync is not implemented by any built-in index.
    async fn delete_documents(&self, _ids: &[String]) -> std::result::Result<usize, SyncError> {
        Err(SyncError::Unsupported("deletion sync"))
    }

    /// Permission propagation is not implemented by any built-in index.
    async fn set_permissions(
        &self,
        _record_id: &str,
        _permissions: &[String],
    ) -> std::result::Result<(), SyncError> {
        Err(SyncError::Unsupported("permission sync"))
    }
}
