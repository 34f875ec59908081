//! Record model and error definitions for the enrichment pipeline.
//!
//! [`DocumentRecord`] is the persisted per-filename result. Field names follow the stored JSON
//! documents; older deployments wrote a few fields under different names (`pypdf2_*`,
//! `fulltextextract_*`) and stored empty strings where an object was expected, so reads accept
//! both spellings and treat `""` as absent. Unknown top-level fields, including archived error
//! maps and store system properties, are carried through untouched.

use crate::{
    extraction::{ExtractionClientError, email::EmailError},
    store::StoreError,
    summarization::SummarizationClientError,
};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors emitted by the enrichment pipeline.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The store returned more than one record for a filename.
    #[error("{count} records exist for file '{filename}'; each file must have a single record")]
    DuplicateRecords {
        /// Filename the store was queried with.
        filename: String,
        /// Number of records returned.
        count: usize,
    },
    /// A file type the pipeline cannot handle reached the core.
    #[error("Unable to process file '{filename}' of type '{extension}'")]
    UnsupportedFileType {
        /// Name of the offending file.
        filename: String,
        /// Its lowercase extension, including the dot.
        extension: String,
    },
    /// A plain-text file was not valid UTF-8.
    #[error("Failed to decode text file: {0}")]
    Decode(#[from] std::string::FromUtf8Error),
    /// Primary extraction failed after exhausting retries.
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionClientError),
    /// Summarization failed after exhausting retries.
    #[error("Summarization failed: {0}")]
    Summarization(#[from] SummarizationClientError),
    /// The email container could not be parsed or its attachments stored.
    #[error("Email extraction failed: {0}")]
    Email(#[from] EmailError),
    /// The record store rejected a read or write.
    #[error("Record store request failed: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a reconciliation pass, with whatever record had been built so far.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ReconcileError {
    /// Working record at the time of failure; `None` when the run was refused up front.
    pub record: Option<Box<DocumentRecord>>,
    /// Underlying failure.
    #[source]
    pub source: ProcessingError,
}

impl ReconcileError {
    pub(crate) fn refused(source: ProcessingError) -> Self {
        Self {
            record: None,
            source,
        }
    }

    pub(crate) fn with_record(record: DocumentRecord, source: ProcessingError) -> Self {
        Self {
            record: Some(Box::new(record)),
            source,
        }
    }
}

/// Input kinds accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// PDF document; the only type that also gets a secondary extract.
    Pdf,
    /// Word document (`.doc`, `.docx`).
    Word,
    /// UTF-8 plain text.
    Text,
    /// Email container (`.msg`, `.eml`).
    Email,
}

impl FileType {
    /// Map a lowercase extension (with its leading dot) to a file type.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            ".pdf" => Some(Self::Pdf),
            ".doc" | ".docx" => Some(Self::Word),
            ".txt" => Some(Self::Text),
            ".msg" | ".eml" => Some(Self::Email),
            _ => None,
        }
    }

    /// Whether the primary extractor reports a page count for this type.
    pub fn has_pages(self) -> bool {
        matches!(self, Self::Pdf | Self::Word)
    }

    /// Whether the page-oriented secondary extractor runs for this type.
    pub fn needs_secondary_extract(self) -> bool {
        matches!(self, Self::Pdf)
    }
}

/// A source file as handed to the pipeline by the invocation layer.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Base name; the record store key.
    pub filename: String,
    /// Directory portion of the blob path.
    pub filepath: String,
    /// Lowercase extension including the dot, or empty.
    pub extension: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Split a blob path into its provenance parts.
    pub fn new(path: &str, bytes: Vec<u8>) -> Self {
        let as_path = Path::new(path);
        let filename = as_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let filepath = as_path
            .parent()
            .map(|parent| parent.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = as_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        Self {
            filename,
            filepath,
            extension,
            bytes,
        }
    }

    /// Resolved file type, if the extension is supported.
    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_extension(&self.extension)
    }

    /// Files parked under an `Archive` directory are never processed.
    pub fn is_archived(&self) -> bool {
        self.filepath.contains("/Archive") || self.filepath.starts_with("Archive")
    }
}

/// Outcome status of a primary extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    /// Text was extracted.
    Succeeded,
    /// The extractor produced no usable text.
    Failed,
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Matched classification marking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMarkings {
    /// The marking term that matched.
    pub classification: String,
    /// Full line of text containing the match.
    #[serde(alias = "full_document_classification_line")]
    pub containing_line: String,
}

/// Metadata about the primary extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextExtractMetadata {
    /// Character length of the extracted text.
    #[serde(
        default,
        alias = "fulltextextract_length",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub length: Option<usize>,
    /// Extraction outcome.
    #[serde(
        default,
        alias = "fulltextextract_status",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub status: Option<ExtractionStatus>,
    /// Page count reported by the primary extractor (page-based types only).
    #[serde(
        default,
        alias = "document_pages",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub page_count: Option<usize>,
}

/// Output of the page-oriented secondary extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecondaryTextExtract {
    /// Number of pages read.
    #[serde(
        default,
        alias = "pypdf2_page_count",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub page_count: Option<usize>,
    /// Pages joined by newlines and trimmed.
    #[serde(default, alias = "pypdf2_fulltext")]
    pub full_text: String,
    /// Per-page text keyed by `page_number_{index}`.
    #[serde(
        default,
        alias = "pypdf2_fulltext_by_page",
        skip_serializing_if = "Option::is_none"
    )]
    pub full_text_by_page: Option<BTreeMap<String, String>>,
    /// Set when the extractor was abandoned at its deadline.
    #[serde(
        default,
        alias = "pypdf2_timeout_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_error: Option<String>,
    /// Set when the extractor failed.
    #[serde(default, alias = "pypdf2_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Key under which page `index` is stored in [`SecondaryTextExtract::full_text_by_page`].
pub fn page_key(index: usize) -> String {
    format!("page_number_{index}")
}

/// Input and output lengths of one summarization call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Characters the service reported reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_input_length: Option<usize>,
    /// Characters in the returned summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_length: Option<usize>,
}

/// Summarization metadata for the whole document plus per-chunk entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizationMetadata {
    /// Total characters submitted (sum over chunks for long documents).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub text_input_length: Option<usize>,
    /// Total characters of summary produced.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub summary_length: Option<usize>,
    /// Error code returned by the service for a single-call document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_error_code: Option<String>,
    /// Error message returned by the service for a single-call document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_error_message: Option<String>,
    /// Per-chunk metadata keyed by `summarypartNN`.
    #[serde(flatten)]
    pub parts: BTreeMap<String, ChunkMetadata>,
}

/// Start, finish, and duration of one summarization chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkTimestamps {
    /// RFC 3339 start instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// RFC 3339 finish instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
    /// Elapsed seconds.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_seconds"
    )]
    pub duration: Option<f64>,
}

/// Per-stage timing markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Start of the run that produced this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_start: Option<String>,
    /// Start of primary extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_start: Option<String>,
    /// End of primary extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_finish: Option<String>,
    /// Seconds spent in primary extraction.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_seconds"
    )]
    pub extraction_duration: Option<f64>,
    /// Start of summarization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_start: Option<String>,
    /// End of summarization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_finish: Option<String>,
    /// Seconds spent summarizing.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_seconds"
    )]
    pub summary_duration: Option<f64>,
    /// Seconds from run start to summary completion.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_seconds"
    )]
    pub total_duration: Option<f64>,
    /// Per-chunk timings keyed by `summarypartNN`.
    #[serde(flatten)]
    pub parts: BTreeMap<String, ChunkTimestamps>,
}

/// Properties pulled from an email container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailProperties {
    /// Sender address or display string.
    #[serde(default)]
    pub sender: String,
    /// Sent date as reported by the message.
    #[serde(default)]
    pub email_date: String,
    /// Subject line.
    #[serde(default)]
    pub email_subject: String,
    /// Raw `To` header.
    #[serde(default)]
    pub to: String,
    /// Raw `Cc` header, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    /// Raw `Bcc` header, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    /// Display names of all recipients.
    #[serde(default)]
    pub recipient_names: Vec<String>,
    /// Addresses of all recipients.
    #[serde(default, alias = "recip_emails")]
    pub recipient_emails: Vec<String>,
    /// Attachment display names, when the message had attachments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_filenames: Option<Vec<String>>,
    /// Locations the attachments were written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_blob_names: Option<Vec<String>>,
}

/// The persisted enrichment result for one filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Identifier assigned at creation.
    pub id: String,
    /// Base name of the source file; unique across the store.
    pub filename: String,
    /// Directory of the source file.
    #[serde(default)]
    pub filepath: String,
    /// Lowercase extension of the source file.
    #[serde(default)]
    pub filetype: String,
    /// Final abstractive summary.
    #[serde(default)]
    pub abstractsummary: String,
    /// Primary extracted text.
    #[serde(default)]
    pub fulltextextract: String,
    /// Detected classification marking.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub filemarkings: Option<FileMarkings>,
    /// Primary extraction metadata.
    #[serde(default)]
    pub textextract_metadata: TextExtractMetadata,
    /// Summarization metadata.
    #[serde(default)]
    pub summarization_metadata: SummarizationMetadata,
    /// Chunk summaries for long documents.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub abstractsummary_parts: BTreeMap<String, String>,
    /// Stage timings.
    #[serde(default)]
    pub timestamps: Timestamps,
    /// Secondary (page-oriented) extract, PDFs only.
    #[serde(
        default,
        alias = "pypdf2_text_extract",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub secondary_text_extract: Option<SecondaryTextExtract>,
    /// Email properties, email containers only.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub email_properties: Option<EmailProperties>,
    /// Errors raised by the run that produced this version.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub error: BTreeMap<String, String>,
    /// Incremented on every reprocessing.
    #[serde(default = "first_version")]
    pub record_version: u32,
    /// Identifier of the run that produced this version.
    #[serde(default)]
    pub current_version_invocation_id: String,
    /// Archived errors and any fields this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn first_version() -> u32 {
    1
}

impl DocumentRecord {
    /// Fresh record for a file seen for the first time.
    pub fn new(id: String, file: &SourceFile, run_id: &str) -> Self {
        Self {
            id,
            filename: file.filename.clone(),
            filepath: file.filepath.clone(),
            filetype: file.extension.clone(),
            abstractsummary: String::new(),
            fulltextextract: String::new(),
            filemarkings: None,
            textextract_metadata: TextExtractMetadata::default(),
            summarization_metadata: SummarizationMetadata::default(),
            abstractsummary_parts: BTreeMap::new(),
            timestamps: Timestamps::default(),
            secondary_text_extract: None,
            email_properties: None,
            error: BTreeMap::new(),
            record_version: first_version(),
            current_version_invocation_id: run_id.to_string(),
            extra: Map::new(),
        }
    }

    /// Bare record carrying only provenance and the failure that stopped the run.
    pub fn minimal_error(
        id: String,
        file: &SourceFile,
        run_id: &str,
        function_start: Option<String>,
        exception: String,
    ) -> Self {
        let mut record = Self::new(id, file, run_id);
        record.timestamps.function_start = function_start;
        record.error.insert("exception".into(), exception);
        record
    }

    /// Key holding the error map archived from `version`.
    pub fn error_archive_key(version: u32) -> String {
        format!("error_archive_v{version}")
    }

    /// Error map archived from `version`, if any.
    pub fn archived_error(&self, version: u32) -> Option<&Map<String, Value>> {
        self.extra
            .get(&Self::error_archive_key(version))
            .and_then(Value::as_object)
    }

    /// Move the live error map under `error_archive_v{record_version}`.
    ///
    /// Returns the archive key, or `None` when there was nothing to archive.
    pub fn archive_error(&mut self) -> Option<String> {
        if self.error.is_empty() {
            return None;
        }
        let key = Self::error_archive_key(self.record_version);
        let archived = std::mem::take(&mut self.error)
            .into_iter()
            .map(|(name, message)| (name, Value::String(message)))
            .collect::<Map<_, _>>();
        self.extra.insert(key.clone(), Value::Object(archived));
        Some(key)
    }

    /// Serialized size in bytes as the record store would receive it.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self)
            .map(|bytes| bytes.len())
            .unwrap_or(usize::MAX)
    }
}

fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(value) => T::deserialize(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}
