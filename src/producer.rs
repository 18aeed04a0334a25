//! Extraction worker (producer side of the pipeline).
//!
//! One [`Extractor::run`] call handles one partition: it fetches raw rows
//! from the [`RecordSource`], turns each into a [`Record`], pushes the whole
//! partition to the hand-off queue as a single batch and returns the
//! partition's `id → url` manifest.
//!
//! # Record composition
//!
//! - `body`: title, abstract, captions (by stream offset), primary events
//!   (by time), slide titles and contents (by offset) and OCR text of
//!   selected attachments, exact repeats removed, joined with `\n` and
//!   stripped of markup
//! - `url`: `{host}/Panopto/Pages/Viewer.aspx?id={delivery id}`
//! - `thumbnail`: first `*_et/thumbs/*.jpg` under the session's directory,
//!   by lower-cased file name
//! - `category`: extension taxonomy over `url`
//!
//! OCR failures are logged and never fail the record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{format_rfc3339, GlobalKeys, RawAttachment, RawRecord, Record, TimeRange};
use crate::queue::HandoffQueue;
use crate::rules::IndexingRules;
use crate::text::{category_for, dedup_concat, strip_html};
use crate::traits::{OcrEngine, RecordSource};

/// Relative to `{thumbnail_root}/{session public id}`.
const THUMBNAIL_GLOB: &str = "*_et/thumbs/*.jpg";

/// Record-shaping settings shared by every extraction worker of a job.
pub struct ExtractSettings {
    pub host_url: String,
    pub thumbnail_root: Option<PathBuf>,
    pub label: String,
    pub categories: BTreeMap<String, Vec<String>>,
    thumbnail_matcher: GlobMatcher,
}

impl ExtractSettings {
    pub fn new(
        host_url: &str,
        thumbnail_root: Option<PathBuf>,
        label: &str,
        categories: BTreeMap<String, Vec<String>>,
    ) -> Result<Self> {
        let thumbnail_matcher = GlobBuilder::new(THUMBNAIL_GLOB)
            .literal_separator(true)
            .case_insensitive(true)
            .build()?
            .compile_matcher();
        Ok(Self {
            host_url: host_url.trim_end_matches('/').to_string(),
            thumbnail_root,
            label: label.to_string(),
            categories,
            thumbnail_matcher,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.source.host_url,
            config.source.thumbnail_root.clone(),
            &config.source.label,
            config.categories.clone(),
        )
    }

    pub fn session_url(&self, public_id: &str) -> String {
        format!("{}/Panopto/Pages/Viewer.aspx?id={}", self.host_url, public_id)
    }

    /// Thumbnail URL for a session, if any image exists on disk.
    pub fn find_thumbnail(&self, session_public_id: &str) -> Option<String> {
        let root = self.thumbnail_root.as_deref()?;
        let session_dir = root.join(session_public_id);
        if !session_dir.is_dir() {
            return None;
        }

        let mut matches: Vec<PathBuf> = WalkDir::new(&session_dir)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .strip_prefix(&session_dir)
                    .map(|rel| self.thumbnail_matcher.is_match(rel))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect();

        matches.sort_by_key(|p| {
            (
                p.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default(),
                p.clone(),
            )
        });

        let first = matches.into_iter().next()?;
        let relative = first.strip_prefix(root).ok()?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(format!("{}/Panopto/Content/Sessions/{}", self.host_url, relative))
    }
}

#[derive(Clone)]
pub struct Extractor {
    source: Arc<dyn RecordSource>,
    ocr: Arc<dyn OcrEngine>,
    rules: Arc<IndexingRules>,
    queue: HandoffQueue,
    settings: Arc<ExtractSettings>,
}

impl Extractor {
    pub fn new(
        source: Arc<dyn RecordSource>,
        ocr: Arc<dyn OcrEngine>,
        rules: Arc<IndexingRules>,
        queue: HandoffQueue,
        settings: Arc<ExtractSettings>,
    ) -> Self {
        Self {
            source,
            ocr,
            rules,
            queue,
            settings,
        }
    }

    /// Extract one partition. A source failure is returned as an error; the
    /// orchestrator decides whether the job survives it.
    pub async fn run(&self, partition: TimeRange) -> Result<GlobalKeys> {
        let raws = self
            .source
            .fetch_records(&partition)
            .await
            .with_context(|| format!("{}: failed to fetch {}", self.source.name(), partition))?;

        let mut keys = GlobalKeys::new();
        let mut batch = Vec::with_capacity(raws.len());
        for raw in raws {
            let record = self.build_record(raw).await;
            keys.insert(record.id.clone(), record.url.clone());
            batch.push(record);
        }

        info!(partition = %partition, records = batch.len(), "partition extracted");
        self.queue.push(batch).await;
        Ok(keys)
    }

    pub async fn build_record(&self, raw: RawRecord) -> Record {
        let url = self.settings.session_url(&raw.public_id);
        let ocr_texts = self.ocr_attachments(&raw.public_id, &raw.attachments).await;
        let body = strip_html(&dedup_concat(body_fragments(&raw, ocr_texts)));

        Record {
            title: raw.title.as_deref().map(strip_html).unwrap_or_default(),
            thumbnail: self.settings.find_thumbnail(&raw.session_public_id),
            category: category_for(&url, &self.settings.categories),
            date: format_rfc3339(raw.start_time),
            permissions: Vec::new(),
            source: self.settings.label.clone(),
            id: raw.public_id,
            body,
            url,
        }
    }

    async fn ocr_attachments(&self, record_id: &str, attachments: &[RawAttachment]) -> Vec<String> {
        if !self.ocr.is_enabled() {
            return Vec::new();
        }
        let mut texts = Vec::new();
        for attachment in attachments {
            let (selected, language) = self.rules.should_ocr(&attachment.path);
            if !selected {
                continue;
            }
            match self.ocr_file(&attachment.file_path, language.as_deref()).await {
                Ok(text) => {
                    debug!(record = record_id, path = %attachment.path, chars = text.len(), "attachment OCR text added");
                    texts.push(text);
                }
                Err(e) => warn!(record = record_id, path = %attachment.path, error = %e, "OCR failed, continuing without it"),
            }
        }
        texts
    }

    async fn ocr_file(&self, path: &Path, language: Option<&str>) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read attachment {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.ocr.run_ocr(bytes, &file_name, language).await
    }
}

/// Candidate body fragments in composition order.
fn body_fragments(raw: &RawRecord, ocr_texts: Vec<String>) -> Vec<Option<String>> {
    let mut captions: Vec<_> = raw.event_targets.iter().flat_map(|t| &t.captions).collect();
    captions.sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));
    let mut events: Vec<_> = raw.event_targets.iter().flat_map(|t| &t.events).collect();
    events.sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));
    let mut slides: Vec<_> = raw.event_targets.iter().flat_map(|t| &t.slides).collect();
    slides.sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));

    let mut fragments = vec![raw.title.clone(), raw.abstract_text.clone()];
    fragments.extend(captions.into_iter().map(|c| c.text.clone()));
    fragments.extend(events.into_iter().map(|e| e.text.clone()));
    for slide in slides {
        fragments.push(slide.title.clone());
        fragments.push(slide.content.clone());
    }
    fragments.extend(ocr_texts.into_iter().map(Some));
    fragments
}
