//! OCR collaborators.
//!
//! [`TikaOcr`] sends attachment bytes to an Apache Tika server
//! (`PUT {url}/tika`) and reads back plain text. [`DisabledOcr`] stands in
//! when `ocr.enabled = false` so the extraction workers never branch on
//! configuration themselves.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::OcrConfig;
use crate::traits::OcrEngine;

/// Language sent when a rule does not name one.
pub const DEFAULT_OCR_LANGUAGE: &str = "eng";

pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn run_ocr(&self, _bytes: Vec<u8>, _file_name: &str, _language: Option<&str>) -> Result<String> {
        bail!("OCR is disabled")
    }
}

pub struct TikaOcr {
    client: reqwest::Client,
    url: String,
}

impl TikaOcr {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for OCR")?;
        Ok(Self {
            client,
            url: format!("{}/tika", config.url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl OcrEngine for TikaOcr {
    async fn run_ocr(&self, bytes: Vec<u8>, file_name: &str, language: Option<&str>) -> Result<String> {
        let size = bytes.len();
        let response = self
            .client
            .put(&self.url)
            .header("Accept", "text/plain")
            .header("X-Tika-OCRLanguage", language.unwrap_or(DEFAULT_OCR_LANGUAGE))
            .header("Content-Disposition", format!("attachment; filename=\"{}\"", file_name))
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("OCR request failed for {}", file_name))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("OCR server returned {} for {}: {}", status, file_name, text);
        }
        let text = response
            .text()
            .await
            .with_context(|| format!("Invalid OCR response for {}", file_name))?;
        debug!(file = file_name, bytes = size, chars = text.len(), "OCR complete");
        Ok(text.trim().to_string())
    }
}

/// Pick the OCR collaborator for a configuration.
pub fn create_ocr(config: &OcrConfig) -> Result<Arc<dyn OcrEngine>> {
    if config.enabled {
        Ok(Arc::new(TikaOcr::new(config)?))
    } else {
        Ok(Arc::new(DisabledOcr))
    }
}
