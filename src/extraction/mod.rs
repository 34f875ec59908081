//! Text extraction collaborators.
//!
//! The primary extractor is an external OCR service reached over HTTP; its result is the
//! source of truth for a document's text. The secondary extractor parses PDFs locally, page by
//! page, and serves as a cross-check and fallback for classification. Email containers have
//! their own parser and attachment sink.

pub mod document_intelligence;
pub mod email;
pub mod secondary;

use crate::processing::types::ExtractionStatus;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub use document_intelligence::DocumentIntelligenceClient;
pub use secondary::{PageTextExtractor, PdfPageExtractor, SecondaryExtractor};

/// Errors raised by the primary extraction service.
#[derive(Debug, Error)]
pub enum ExtractionClientError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service responded with an unexpected status code.
    #[error("Unexpected extraction service response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body associated with the failing response.
        body: String,
    },
    /// The service accepted the request but did not say where to poll for the result.
    #[error("Extraction service response carried no operation location")]
    MissingOperationLocation,
    /// The response body could not be interpreted.
    #[error("Malformed extraction service response: {0}")]
    InvalidResponse(String),
}

/// Result of one primary extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryExtraction {
    /// Final operation status.
    pub status: ExtractionStatus,
    /// Extracted text, possibly empty.
    pub text: String,
    /// Number of pages the service analyzed.
    pub page_count: usize,
}

/// Interface implemented by OCR / primary text extraction backends.
#[async_trait]
pub trait PrimaryExtractor: Send + Sync {
    /// Submit the document and wait for its text.
    async fn extract_primary(
        &self,
        bytes: &[u8],
    ) -> Result<PrimaryExtraction, ExtractionClientError>;
}
