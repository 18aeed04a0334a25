//! Configuration parsing and validation.
//!
//! The configuration is a TOML file with one table per concern. Every field
//! has a default fixed at load time; [`load_config`] validates the whole file
//! once and reports every invalid field together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::models::parse_rfc3339;
use crate::rules::RuleScope;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub state: StateConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    /// Extra category buckets: name → file extensions.
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where checkpoints and the job manifest are kept.
#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Checkpoint key for this source.
    #[serde(default = "default_source_name")]
    pub name: String,
    /// Value written into every record's `source` field.
    #[serde(default = "default_source_label")]
    pub label: String,
    pub db_path: PathBuf,
    pub host_url: String,
    #[serde(default)]
    pub thumbnail_root: Option<PathBuf>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_source_name() -> String {
    "panopto".to_string()
}
fn default_source_label() -> String {
    "training".to_string()
}
fn default_retry_count() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub host_url: String,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Falls back to the `ES_PASSWORD` environment variable.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub max_retries: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Source field the logical id is read back from on lookups. Documents
    /// are written with the logical id as `_id`.
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host_url: String::new(),
            index: String::new(),
            username: None,
            password: None,
            timeout_secs: default_index_timeout_secs(),
            max_retries: default_retry_count(),
            batch_size: default_batch_size(),
            id_field: default_id_field(),
        }
    }
}

fn default_backend() -> String {
    "elasticsearch".to_string()
}
fn default_index_timeout_secs() -> u64 {
    1000
}
fn default_batch_size() -> usize {
    100
}
fn default_id_field() -> String {
    "id".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ocr_url")]
    pub url: String,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_ocr_url(),
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

fn default_ocr_url() -> String {
    "http://localhost:9998".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_start_time")]
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default = "default_thread_count")]
    pub producer_threads: usize,
    #[serde(default = "default_thread_count")]
    pub consumer_threads: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            end_time: None,
            producer_threads: default_thread_count(),
            consumer_threads: default_thread_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_start_time() -> String {
    "1970-01-01T00:00:00Z".to_string()
}
fn default_thread_count() -> usize {
    5
}
fn default_queue_capacity() -> usize {
    64
}

impl SyncConfig {
    /// Parsed `start_time`. Only valid after [`load_config`] succeeded.
    pub fn start(&self) -> Result<DateTime<Utc>> {
        parse_rfc3339(&self.start_time)
            .map_err(|e| SyncError::config(format!("sync.start_time: {}", e)))
    }

    /// Parsed `end_time`, if configured.
    pub fn end(&self) -> Result<Option<DateTime<Utc>>> {
        self.end_time
            .as_deref()
            .map(|s| {
                parse_rfc3339(s).map_err(|e| SyncError::config(format!("sync.end_time: {}", e)))
            })
            .transpose()
    }
}

/// One OCR path rule.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OcrRule {
    pub path: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RulesConfig {
    #[serde(default)]
    pub include: Vec<OcrRule>,
    #[serde(default)]
    pub exclude: Vec<OcrRule>,
    #[serde(default)]
    pub exclude_enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl IndexConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var("ES_PASSWORD").ok())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SyncError::config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| SyncError::config(format!("failed to parse config file: {}", e)))?;
    let errors = validate(&config, Utc::now());
    if !errors.is_empty() {
        return Err(SyncError::Config { errors });
    }
    Ok(config)
}

/// Every problem with `config`, in field order.
pub fn validate(config: &Config, now: DateTime<Utc>) -> Vec<String> {
    let mut errors = Vec::new();

    if config.state.path.as_os_str().is_empty() {
        errors.push("state.path must not be empty".to_string());
    }

    if config.source.name.trim().is_empty() {
        errors.push("source.name must not be empty".to_string());
    }
    if config.source.host_url.trim().is_empty() {
        errors.push("source.host_url must not be empty".to_string());
    }
    if config.source.db_path.as_os_str().is_empty() {
        errors.push("source.db_path must not be empty".to_string());
    }
    if config.source.retry_count < 1 {
        errors.push("source.retry_count must be >= 1".to_string());
    }

    match config.index.backend.as_str() {
        "elasticsearch" => {
            if config.index.host_url.trim().is_empty() {
                errors.push("index.host_url is required for the elasticsearch backend".to_string());
            }
            if config.index.index.trim().is_empty() {
                errors.push("index.index is required for the elasticsearch backend".to_string());
            }
        }
        "memory" => {}
        other => errors.push(format!(
            "index.backend '{}' is unknown; must be elasticsearch or memory",
            other
        )),
    }
    if config.index.batch_size < 1 {
        errors.push("index.batch_size must be >= 1".to_string());
    }
    if config.index.timeout_secs == 0 {
        errors.push("index.timeout_secs must be > 0".to_string());
    }

    if config.ocr.enabled && config.ocr.url.trim().is_empty() {
        errors.push("ocr.url is required when ocr.enabled = true".to_string());
    }

    if config.sync.producer_threads < 1 {
        errors.push("sync.producer_threads must be >= 1".to_string());
    }
    if config.sync.consumer_threads < 1 {
        errors.push("sync.consumer_threads must be >= 1".to_string());
    }

    let start = match parse_rfc3339(&config.sync.start_time) {
        Ok(ts) => Some(ts),
        Err(e) => {
            errors.push(format!(
                "sync.start_time '{}' is not RFC 3339: {}",
                config.sync.start_time, e
            ));
            None
        }
    };
    let end = match config.sync.end_time.as_deref().map(parse_rfc3339) {
        Some(Ok(ts)) => Some(ts),
        Some(Err(e)) => {
            errors.push(format!("sync.end_time is not RFC 3339: {}", e));
            None
        }
        None => None,
    };
    if let Some(start) = start {
        if start > now {
            errors.push("sync.start_time must not be in the future".to_string());
        }
        if let Some(end) = end {
            if start >= end {
                errors.push(format!(
                    "sync.start_time ({}) must be earlier than sync.end_time ({})",
                    config.sync.start_time,
                    config.sync.end_time.as_deref().unwrap_or_default()
                ));
            }
        }
    }

    for (kind, rules) in [("include", &config.rules.include), ("exclude", &config.rules.exclude)] {
        for rule in rules {
            if RuleScope::parse(&rule.path).is_none() {
                errors.push(format!(
                    "rules.{} path '{}' must contain sectionID=<n>",
                    kind, rule.path
                ));
            }
        }
    }

    match config.logging.level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => errors.push(format!(
            "logging.level '{}' must be one of trace, debug, info, warn, error",
            other
        )),
    }
    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => errors.push(format!("logging.format '{}' must be text or json", other)),
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[state]
path = "./data/state.sqlite"

[source]
db_path = "./data/panopto.sqlite"
host_url = "https://video.example.edu"

[index]
backend = "memory"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.source.name, "panopto");
        assert_eq!(config.source.label, "training");
        assert_eq!(config.source.retry_count, 3);
        assert_eq!(config.index.batch_size, 100);
        assert_eq!(config.index.timeout_secs, 1000);
        assert_eq!(config.sync.producer_threads, 5);
        assert_eq!(config.sync.consumer_threads, 5);
        assert_eq!(config.sync.queue_capacity, 64);
        assert_eq!(config.sync.start_time, "1970-01-01T00:00:00Z");
        assert!(!config.ocr.enabled);
        assert!(config.rules.include.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn reports_every_invalid_field_at_once() {
        let text = r#"
[state]
path = "./state.sqlite"

[source]
db_path = "./panopto.sqlite"
host_url = ""
retry_count = 0

[index]
backend = "elasticsearch"
batch_size = 0

[sync]
producer_threads = 0
consumer_threads = 0
start_time = "2024-02-01T00:00:00Z"
end_time = "2024-01-01T00:00:00Z"

[[rules.include]]
path = "/no/section"

[logging]
level = "loud"
"#;
        let err = parse_config(text).unwrap_err();
        let SyncError::Config { errors } = err else {
            panic!("expected config error");
        };
        let joined = errors.join("\n");
        for needle in [
            "source.host_url",
            "source.retry_count",
            "index.host_url",
            "index.index",
            "index.batch_size",
            "sync.producer_threads",
            "sync.consumer_threads",
            "earlier than sync.end_time",
            "rules.include",
            "logging.level",
        ] {
            assert!(joined.contains(needle), "missing '{}' in:\n{}", needle, joined);
        }
    }

    #[test]
    fn rejects_unparseable_times_and_unknown_backend() {
        let text = MINIMAL.replace("backend = \"memory\"", "backend = \"solr\"")
            + "\n[sync]\nstart_time = \"yesterday\"\n";
        let SyncError::Config { errors } = parse_config(&text).unwrap_err() else {
            panic!("expected config error");
        };
        assert!(errors.iter().any(|e| e.contains("solr")));
        assert!(errors.iter().any(|e| e.contains("RFC 3339")));
    }

    #[test]
    fn future_start_time_is_rejected() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let mut config = config;
        config.sync.start_time = "2999-01-01T00:00:00Z".to_string();
        let errors = validate(&config, Utc::now());
        assert!(errors.iter().any(|e| e.contains("future")));
    }

    #[test]
    fn parses_rules_and_categories() {
        let text = format!(
            "{}\n[rules]\nexclude_enabled = true\n[[rules.include]]\npath = \"sectionID=12\"\nlanguage = \"en\"\n[[rules.exclude]]\npath = \"sectionID=12&attachmentID=3\"\n\n[categories]\naudio = [\"mp3\"]\n",
            MINIMAL
        );
        let config = parse_config(&text).unwrap();
        assert!(config.rules.exclude_enabled);
        assert_eq!(config.rules.include[0].language.as_deref(), Some("en"));
        assert_eq!(config.rules.exclude.len(), 1);
        assert_eq!(config.categories["audio"], vec!["mp3"]);
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse_config(include_str!("../config/panopto-sync.example.toml")).unwrap();
        assert_eq!(config.index.backend, "elasticsearch");
        assert_eq!(config.index.index, "training");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.is_fatal_before_start());
    }
}
