//! Summarization of arbitrarily long text through a size-limited service.
//!
//! Text under the per-call ceiling is summarized in one call. Longer text is split with
//! [`split_for_summary`] and every chunk is submitted on its own; a failing chunk is recorded
//! under its part key and the remaining chunks still run.

use crate::{
    processing::{
        chunking::{needs_chunking, split_for_summary},
        types::{ChunkMetadata, ChunkTimestamps, SummarizationMetadata},
    },
    retry::{RetryPolicy, retry_with_backoff},
    summarization::{ChunkSummary, SummarizationClient, SummarizationClientError},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Error recorded when every chunk of a long document failed.
pub const FINAL_SUMMARY_ERROR: &str = "Something went wrong creating summary of long document";

/// Everything a summarization pass produced, ready to merge into a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryReport {
    /// Final summary; empty when nothing could be summarized.
    pub summary: String,
    /// Lengths, service error details, and per-chunk metadata.
    pub metadata: SummarizationMetadata,
    /// Chunk summaries keyed by part (chunked runs only).
    pub parts: BTreeMap<String, String>,
    /// Chunk timings keyed by part (chunked runs only).
    pub part_timestamps: BTreeMap<String, ChunkTimestamps>,
    /// Errors to merge into the record's error map.
    pub errors: BTreeMap<String, String>,
    /// Number of service submissions made.
    pub chunk_count: usize,
}

/// Key for chunk `index`: `summarypart00`, `summarypart01`, ...
pub fn part_key(index: usize) -> String {
    format!("summarypart{index:02}")
}

/// Current instant as an RFC 3339 UTC string.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

/// Drives a [`SummarizationClient`] over text of any length.
#[derive(Clone)]
pub struct ChunkedSummarizer {
    client: Arc<dyn SummarizationClient>,
    retry: RetryPolicy,
    max_chunk_chars: usize,
}

impl ChunkedSummarizer {
    /// Summarizer submitting at most `max_chunk_chars` characters per call.
    pub fn new(
        client: Arc<dyn SummarizationClient>,
        retry: RetryPolicy,
        max_chunk_chars: usize,
    ) -> Self {
        Self {
            client,
            retry,
            max_chunk_chars,
        }
    }

    async fn call(
        &self,
        text: &str,
        label: &str,
    ) -> Result<ChunkSummary, SummarizationClientError> {
        retry_with_backoff(&self.retry, label, || self.client.summarize_chunk(text)).await
    }

    /// Summarize `text`.
    ///
    /// For a single-call document a service rejection is recorded in the metadata and retry
    /// exhaustion is returned as an error. For chunked documents both are recorded per part.
    pub async fn summarize(&self, text: &str) -> Result<SummaryReport, SummarizationClientError> {
        if !needs_chunking(text, self.max_chunk_chars) {
            return self.summarize_single(text).await;
        }
        Ok(self.summarize_chunked(text).await)
    }

    async fn summarize_single(
        &self,
        text: &str,
    ) -> Result<SummaryReport, SummarizationClientError> {
        let mut report = SummaryReport {
            chunk_count: 1,
            ..SummaryReport::default()
        };
        match self.call(text, "summarize").await? {
            ChunkSummary::Summarized {
                summary_text,
                input_length,
            } => {
                report.metadata.text_input_length = Some(input_length);
                report.metadata.summary_length = Some(summary_text.chars().count());
                report.summary = summary_text;
            }
            ChunkSummary::Rejected { code, message } => {
                tracing::error!(%code, %message, "Document summarization rejected");
                report.metadata.summary_error_code = Some(code);
                report.metadata.summary_error_message = Some(message);
            }
        }
        Ok(report)
    }

    async fn summarize_chunked(&self, text: &str) -> SummaryReport {
        let chunks = split_for_summary(text, self.max_chunk_chars);
        tracing::info!(
            chunks = chunks.len(),
            max_chunk_chars = self.max_chunk_chars,
            "Text exceeds summarization ceiling; summarizing in chunks"
        );

        let mut report = SummaryReport {
            chunk_count: chunks.len(),
            ..SummaryReport::default()
        };
        let mut summaries = Vec::with_capacity(chunks.len());
        let mut total_input = 0;
        let mut total_summary = 0;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let key = part_key(index);
            let start = now_rfc3339();
            let timer = Instant::now();
            tracing::info!(part = %key, "Summarizing chunk");

            let outcome = self.call(chunk, &key).await;
            report.part_timestamps.insert(
                key.clone(),
                ChunkTimestamps {
                    start: Some(start),
                    finish: Some(now_rfc3339()),
                    duration: Some(timer.elapsed().as_secs_f64()),
                },
            );

            match outcome {
                Ok(ChunkSummary::Summarized {
                    summary_text,
                    input_length,
                }) => {
                    let summary_length = summary_text.chars().count();
                    total_input += input_length;
                    total_summary += summary_length;
                    report.metadata.parts.insert(
                        key.clone(),
                        ChunkMetadata {
                            text_input_length: Some(input_length),
                            summary_length: Some(summary_length),
                        },
                    );
                    report.parts.insert(key, summary_text.clone());
                    summaries.push(summary_text);
                }
                Ok(ChunkSummary::Rejected { code, message }) => {
                    tracing::error!(
                        part = %key,
                        %code,
                        %message,
                        "Chunk summarization rejected"
                    );
                    report.errors.insert(format!("{key}_error_code"), code);
                    report.errors.insert(format!("{key}_error_message"), message);
                }
                Err(error) => {
                    tracing::error!(part = %key, error = %error, "Chunk summarization failed");
                    report
                        .errors
                        .insert(format!("{key}_error_code"), "exception".into());
                    report
                        .errors
                        .insert(format!("{key}_error_message"), error.to_string());
                }
            }
        }

        report.summary = summaries.join(" ");
        if report.summary.trim().is_empty() {
            tracing::error!("{FINAL_SUMMARY_ERROR}");
            report
                .errors
                .insert("final_summary_error".into(), FINAL_SUMMARY_ERROR.into());
        } else {
            report.metadata.text_input_length = Some(total_input);
            report.metadata.summary_length = Some(total_summary);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted outcomes in order and records every submitted text.
    struct Scripted {
        outcomes: Mutex<Vec<Result<ChunkSummary, SummarizationClientError>>>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<ChunkSummary, SummarizationClientError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SummarizationClient for Scripted {
        async fn summarize_chunk(
            &self,
            text: &str,
        ) -> Result<ChunkSummary, SummarizationClientError> {
            self.seen.lock().expect("lock").push(text.to_string());
            let mut outcomes = self.outcomes.lock().expect("lock");
            if outcomes.is_empty() {
                let exhausted = "script exhausted".to_string();
                return Err(SummarizationClientError::GenerationFailed(exhausted));
            }
            outcomes.remove(0)
        }
    }

    fn summarized(
        text: &str,
        input_length: usize,
    ) -> Result<ChunkSummary, SummarizationClientError> {
        Ok(ChunkSummary::Summarized {
            summary_text: text.into(),
            input_length,
        })
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn short_text_is_one_call() {
        let client = Scripted::new(vec![summarized("Short summary.", 11)]);
        let summarizer = ChunkedSummarizer::new(client.clone(), no_retry(), 100);

        let report = summarizer.summarize("hello world").await.expect("report");

        assert_eq!(report.summary, "Short summary.");
        assert_eq!(report.chunk_count, 1);
        assert_eq!(report.metadata.text_input_length, Some(11));
        assert_eq!(report.metadata.summary_length, Some(14));
        assert!(report.parts.is_empty());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn short_text_rejection_is_recorded_in_metadata() {
        let rejected = ChunkSummary::Rejected {
            code: "InvalidDocument".into(),
            message: "too short".into(),
        };
        let client = Scripted::new(vec![Ok(rejected)]);
        let summarizer = ChunkedSummarizer::new(client, no_retry(), 100);

        let report = summarizer.summarize("x").await.expect("report");
        let metadata = &report.metadata;

        assert!(report.summary.is_empty());
        assert_eq!(metadata.summary_error_code.as_deref(), Some("InvalidDocument"));
        assert_eq!(metadata.summary_error_message.as_deref(), Some("too short"));
    }

    #[tokio::test]
    async fn short_text_exhausted_retries_propagate() {
        let down = SummarizationClientError::ProviderUnavailable("down".into());
        let client = Scripted::new(vec![Err(down)]);
        let summarizer = ChunkedSummarizer::new(client, no_retry(), 100);

        let error = summarizer.summarize("x").await.expect_err("propagated");
        assert!(matches!(
            error,
            SummarizationClientError::ProviderUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn failed_chunk_does_not_abort_siblings() {
        let client = Scripted::new(vec![
            summarized("One.", 9),
            Ok(ChunkSummary::Rejected {
                code: "InvalidArgument".into(),
                message: "bad chunk".into(),
            }),
            Err(SummarizationClientError::GenerationFailed("timeout".into())),
            summarized("Four.", 3),
        ]);
        let summarizer = ChunkedSummarizer::new(client.clone(), no_retry(), 10);
        let text = "aaaaaaaa\nbbbbbbbb\ncccccccc\nddd";

        let report = summarizer.summarize(text).await.expect("report");

        let seen = client.seen.lock().expect("lock").clone();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.concat(), text);
        assert_eq!(report.chunk_count, 4);
        assert_eq!(report.summary, "One. Four.");
        let part = |key: &str| report.parts.get(key).map(String::as_str);
        assert_eq!(part("summarypart00"), Some("One."));
        assert_eq!(part("summarypart03"), Some("Four."));
        assert_eq!(
            report.errors.get("summarypart01_error_code").map(String::as_str),
            Some("InvalidArgument")
        );
        assert_eq!(
            report.errors.get("summarypart02_error_code").map(String::as_str),
            Some("exception")
        );
        assert!(
            report
                .errors
                .get("summarypart02_error_message")
                .is_some_and(|message| message.contains("timeout"))
        );
        assert_eq!(report.part_timestamps.len(), 4);
        assert_eq!(report.metadata.text_input_length, Some(12));
        assert_eq!(report.metadata.summary_length, Some(9));
        assert!(!report.errors.contains_key("final_summary_error"));
    }

    #[tokio::test]
    async fn all_chunks_failing_records_final_error() {
        let client = Scripted::new(vec![
            Err(SummarizationClientError::GenerationFailed("a".into())),
            Err(SummarizationClientError::GenerationFailed("b".into())),
        ]);
        let summarizer = ChunkedSummarizer::new(client, no_retry(), 5);

        let report = summarizer.summarize("abcdefgh").await.expect("report");

        assert!(report.summary.is_empty());
        assert_eq!(
            report.errors.get("final_summary_error").map(String::as_str),
            Some(FINAL_SUMMARY_ERROR)
        );
        assert!(report.metadata.text_input_length.is_none());
    }
}
