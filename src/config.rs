use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::{processing::size_guard::DEFAULT_MAX_RECORD_BYTES, retry::RetryPolicy};

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the enrichment pipeline.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the document intelligence (OCR) service.
    pub form_recognizer_endpoint: String,
    /// Subscription key for the document intelligence service.
    pub form_recognizer_key: String,
    /// Base URL of the language service used for abstractive summaries.
    pub ai_language_endpoint: String,
    /// Subscription key for the language service.
    pub ai_language_key: String,
    /// Directory holding one JSON document per record.
    pub store_dir: PathBuf,
    /// Directory where email attachments are written.
    pub attachment_dir: PathBuf,
    /// Reference list of classification markings, one per line.
    pub classifications_file: PathBuf,
    /// Wall-clock budget for the secondary PDF extractor, in seconds.
    pub secondary_extract_timeout_secs: u64,
    /// Character ceiling of a single summarization submission.
    pub summary_max_chunk_chars: usize,
    /// Maximum serialized record size accepted by the record store.
    pub max_record_bytes: usize,
    /// Lower bound of the OCR retry wait, in seconds.
    pub ocr_retry_min_secs: u64,
    /// Upper bound of the OCR retry wait, in seconds.
    pub ocr_retry_max_secs: u64,
    /// Lower bound of the summarization retry wait, in seconds.
    pub summary_retry_min_secs: u64,
    /// Upper bound of the summarization retry wait, in seconds.
    pub summary_retry_max_secs: u64,
    /// Total retry budget for any external call, in seconds.
    pub retry_deadline_secs: u64,
    /// Interval between polls of long-running service operations, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long one OCR analysis may stay pending, in seconds.
    pub ocr_poll_timeout_secs: u64,
    /// How long one summarization job may stay pending, in seconds.
    pub summary_poll_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            form_recognizer_endpoint: load_env("FORM_RECOGNIZER_ENDPOINT")?,
            form_recognizer_key: load_env("FORM_RECOGNIZER_KEY")?,
            ai_language_endpoint: load_env("AI_LANGUAGE_ENDPOINT")?,
            ai_language_key: load_env("AI_LANGUAGE_KEY")?,
            store_dir: load_env("DOCSUM_STORE_DIR")?.into(),
            attachment_dir: load_env_optional("DOCSUM_ATTACHMENT_DIR")
                .unwrap_or_else(|| "attachments".into())
                .into(),
            classifications_file: load_env("DOCSUM_CLASSIFICATIONS_FILE")?.into(),
            secondary_extract_timeout_secs: parse_optional("SECONDARY_EXTRACT_TIMEOUT_SECS", 60)?,
            summary_max_chunk_chars: parse_optional("SUMMARY_MAX_CHUNK_CHARS", 125_000)?,
            max_record_bytes: parse_optional("MAX_RECORD_BYTES", DEFAULT_MAX_RECORD_BYTES)?,
            ocr_retry_min_secs: parse_optional("OCR_RETRY_MIN_SECS", 20)?,
            ocr_retry_max_secs: parse_optional("OCR_RETRY_MAX_SECS", 30)?,
            summary_retry_min_secs: parse_optional("SUMMARY_RETRY_MIN_SECS", 30)?,
            summary_retry_max_secs: parse_optional("SUMMARY_RETRY_MAX_SECS", 45)?,
            retry_deadline_secs: parse_optional("RETRY_DEADLINE_SECS", 300)?,
            poll_interval_ms: parse_optional("POLL_INTERVAL_MS", 1_000)?,
            ocr_poll_timeout_secs: parse_optional("OCR_POLL_TIMEOUT_SECS", 300)?,
            summary_poll_timeout_secs: parse_optional("SUMMARY_POLL_TIMEOUT_SECS", 300)?,
        })
    }

    /// Pipeline knobs handed to the enrichment service.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let deadline = Duration::from_secs(self.retry_deadline_secs);
        PipelineSettings {
            secondary_extract_timeout: Duration::from_secs(self.secondary_extract_timeout_secs),
            max_chunk_chars: self.summary_max_chunk_chars,
            max_record_bytes: self.max_record_bytes,
            ocr_retry: RetryPolicy::new(
                Duration::from_secs(self.ocr_retry_min_secs),
                Duration::from_secs(self.ocr_retry_max_secs),
                deadline,
            ),
            summary_retry: RetryPolicy::new(
                Duration::from_secs(self.summary_retry_min_secs),
                Duration::from_secs(self.summary_retry_max_secs),
                deadline,
            ),
        }
    }

    /// Interval between polls of long-running service operations.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pending budget of one OCR analysis.
    pub fn ocr_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_poll_timeout_secs)
    }

    /// Pending budget of one summarization job.
    pub fn summary_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_poll_timeout_secs)
    }
}

/// Tunables consumed by [`crate::processing::EnrichmentService`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// How long the caller waits for the secondary extractor before abandoning it.
    pub secondary_extract_timeout: Duration,
    /// Character ceiling of one summarization submission.
    pub max_chunk_chars: usize,
    /// Serialized size ceiling enforced by the size guard.
    pub max_record_bytes: usize,
    /// Backoff applied around the primary extraction call.
    pub ocr_retry: RetryPolicy,
    /// Backoff applied around each summarization call.
    pub summary_retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let deadline = Duration::from_secs(300);
        Self {
            secondary_extract_timeout: Duration::from_secs(60),
            max_chunk_chars: 125_000,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            ocr_retry: RetryPolicy::new(Duration::from_secs(20), Duration::from_secs(30), deadline),
            summary_retry: RetryPolicy::new(
                Duration::from_secs(30),
                Duration::from_secs(45),
                deadline,
            ),
        }
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        ocr_endpoint = %config.form_recognizer_endpoint,
        language_endpoint = %config.ai_language_endpoint,
        store_dir = %config.store_dir.display(),
        max_chunk_chars = config.summary_max_chunk_chars,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
