//! # Panopto Sync
//!
//! Synchronizes video session metadata from a Panopto deployment into a
//! search index.
//!
//! A job splits its time window into partitions, extracts each partition in
//! parallel, hands records to a pool of indexing workers through a queue and
//! commits a durable checkpoint once every record has been submitted.
//!
//! ## Architecture
//!
//! ```text
//!               ┌─────────────┐
//!               │ Checkpoints │◀─────────────────────────────┐
//!               └──────┬──────┘                              │
//!                      ▼                                     │
//! ┌──────────┐   ┌───────────┐   ┌─────────┐   ┌──────────┐  │
//! │  Source  │──▶│ Producers │──▶│  Queue  │──▶│Consumers │──┘
//! │ (SQLite) │   │  (+ OCR)  │   └─────────┘   └────┬─────┘
//! └──────────┘   └───────────┘                      ▼
//!                                            ┌─────────────┐
//!                                            │ SearchIndex │
//!                                            └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! panopto-sync init                    # create state database
//! panopto-sync full-sync               # sync the configured window
//! panopto-sync incremental-sync        # sync since the last checkpoint
//! panopto-sync status                  # show checkpoints
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Sync error taxonomy |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Core data types |
//! | [`partition`] | Time-window partitioning |
//! | [`queue`] | Producer → consumer hand-off queue |
//! | [`pool`] | Fixed-size worker pool |
//! | [`text`] | Body composition and category taxonomy |
//! | [`rules`] | OCR include/exclude rules |
//! | [`producer`] | Extraction workers |
//! | [`consumer`] | Indexing workers |
//! | [`checkpoint`] | Checkpoint and manifest persistence |
//! | [`sync`] | Job orchestration |
//! | [`traits`] | Source, OCR and index interfaces |
//! | [`source_sqlite`] | SQLite source |
//! | [`ocr`] | Tika OCR client |
//! | [`index_elastic`] | Elasticsearch index |
//! | [`index_memory`] | In-process index |
//! | [`db`] | State database connection |
//! | [`migrate`] | State schema |
//! | [`status`] | Status command |

pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod index_elastic;
pub mod index_memory;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod partition;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod rules;
pub mod source_sqlite;
pub mod status;
pub mod sync;
pub mod text;
pub mod traits;
