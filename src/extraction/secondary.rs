//! Page-oriented secondary extraction with a wall-clock bound.
//!
//! Third-party PDF parsing can hang or panic on malformed input, so the work runs on its own OS
//! thread. The worker reports through two single-slot channels, one for pages and one for the
//! error, and the caller waits for both to settle under a timeout. On timeout the caller stops
//! waiting and moves on; the thread is never joined and anything it sends later is dropped with
//! the receivers. The worker owns its inputs and writes nothing shared.

use crate::processing::types::{SecondaryTextExtract, page_key};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Placeholder text stored when the extractor produced nothing usable.
pub const NO_TEXT_EXTRACTED: &str = "No text extracted";

/// Blocking per-page text extraction.
pub trait PageTextExtractor: Send + Sync + 'static {
    /// Return the text of each page, in order.
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, String>;
}

/// [`PageTextExtractor`] backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPageExtractor;

impl PageTextExtractor for PdfPageExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, String> {
        // pdf-extract (and its font parsers) can panic on malformed glyph tables.
        match catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        })) {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err("PDF parser panicked, likely on a malformed font".to_string()),
        }
    }
}

/// Runs a [`PageTextExtractor`] on a detached worker and bounds the wait for it.
#[derive(Clone)]
pub struct SecondaryExtractor {
    pages: Arc<dyn PageTextExtractor>,
}

impl SecondaryExtractor {
    /// Wrap a page extractor.
    pub fn new(pages: Arc<dyn PageTextExtractor>) -> Self {
        Self { pages }
    }

    /// Extract `bytes`, giving up after `timeout`.
    ///
    /// Never fails: timeouts and extractor errors are reported inside the returned extract.
    pub async fn extract(&self, bytes: &[u8], timeout: Duration) -> SecondaryTextExtract {
        let (result_tx, result_rx) = oneshot::channel::<Vec<String>>();
        let (error_tx, error_rx) = oneshot::channel::<String>();
        let pages = Arc::clone(&self.pages);
        let owned = bytes.to_vec();

        let spawned = std::thread::Builder::new()
            .name("secondary-extract".into())
            .spawn(move || match pages.extract_pages(&owned) {
                Ok(text) => {
                    let _ = result_tx.send(text);
                }
                Err(error) => {
                    tracing::error!(error = %error, "Secondary extraction worker failed");
                    let _ = error_tx.send(error);
                }
            });
        if let Err(error) = spawned {
            return failed_extract(format!("could not start worker: {error}"));
        }

        let settled = tokio::time::timeout(timeout, async {
            let (result, error) = tokio::join!(result_rx, error_rx);
            (result.ok(), error.ok())
        })
        .await;

        match settled {
            Ok((Some(pages), _)) => assemble(pages),
            Err(_) => {
                let seconds = timeout.as_secs_f64();
                tracing::error!(timeout_secs = seconds, "Secondary extraction timed out");
                SecondaryTextExtract {
                    page_count: None,
                    full_text: NO_TEXT_EXTRACTED.into(),
                    full_text_by_page: None,
                    timeout_error: Some(format!(
                        "Error: Text extraction timed out after {seconds} seconds"
                    )),
                    error: None,
                }
            }
            Ok((None, Some(error))) => failed_extract(error),
            Ok((None, None)) => failed_extract("worker exited without a result".into()),
        }
    }
}

fn assemble(pages: Vec<String>) -> SecondaryTextExtract {
    let page_count = pages.len();
    let full_text = pages.join("\n").trim().to_string();
    let by_page = pages
        .into_iter()
        .enumerate()
        .map(|(index, text)| (page_key(index), text))
        .collect::<BTreeMap<_, _>>();
    SecondaryTextExtract {
        page_count: Some(page_count),
        full_text,
        full_text_by_page: Some(by_page),
        timeout_error: None,
        error: None,
    }
}

fn failed_extract(description: String) -> SecondaryTextExtract {
    tracing::error!(error = %description, "Secondary PDF extraction failed");
    SecondaryTextExtract {
        page_count: None,
        full_text: NO_TEXT_EXTRACTED.into(),
        full_text_by_page: None,
        timeout_error: None,
        error: Some(format!(
            "Error during secondary PDF extraction: {description}"
        )),
    }
}
