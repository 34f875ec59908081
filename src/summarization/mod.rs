//! Abstractions for generating abstractive summaries through a hosted language service.
//!
//! Summaries are produced by an asynchronous job: the text is submitted once, the service
//! answers with an `Operation-Location`, and the job is polled until it settles. A job that
//! completes with a per-document error is a *rejection*, reported as data rather than as an
//! error so callers can record it and move on; transport failures and malformed responses are
//! errors and are eligible for retry.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;

const API_VERSION: &str = "2023-04-01";
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Errors surfaced while attempting abstractive summarization.
#[derive(Debug, Error)]
pub enum SummarizationClientError {
    /// Provider could not be reached.
    #[error("Summarization provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate summary: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Outcome of summarizing one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSummary {
    /// The service produced a summary.
    Summarized {
        /// Summary text.
        summary_text: String,
        /// Characters of input the service reports having read.
        input_length: usize,
    },
    /// The service accepted the job but refused this document.
    Rejected {
        /// Service error code.
        code: String,
        /// Service error message.
        message: String,
    },
}

/// Interface implemented by abstractive summarization providers.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Summarize a single piece of text no longer than the provider's input ceiling.
    async fn summarize_chunk(&self, text: &str) -> Result<ChunkSummary, SummarizationClientError>;
}

/// Client for the language service's abstractive summarization jobs.
pub struct LanguageSummarizationClient {
    http: Client,
    endpoint: String,
    api_key: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct JobState {
    status: String,
    #[serde(default)]
    tasks: Option<JobTasks>,
    #[serde(default)]
    errors: Vec<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct JobTasks {
    #[serde(default)]
    items: Vec<TaskItem>,
}

#[derive(Debug, Deserialize)]
struct TaskItem {
    #[serde(default)]
    results: Option<TaskResults>,
}

#[derive(Debug, Deserialize)]
struct TaskResults {
    #[serde(default)]
    documents: Vec<DocumentSummaries>,
    #[serde(default)]
    errors: Vec<DocumentError>,
}

#[derive(Debug, Deserialize)]
struct DocumentSummaries {
    #[serde(default)]
    summaries: Vec<SummaryItem>,
}

#[derive(Debug, Deserialize)]
struct SummaryItem {
    text: String,
    #[serde(default)]
    contexts: Vec<SummaryContext>,
}

#[derive(Debug, Deserialize)]
struct SummaryContext {
    length: usize,
}

#[derive(Debug, Deserialize)]
struct DocumentError {
    error: ServiceError,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl LanguageSummarizationClient {
    /// Build a client for the service at `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self, SummarizationClientError> {
        let http = Client::builder()
            .user_agent("docsum/summary")
            .build()
            .map_err(|error| {
                SummarizationClientError::ProviderUnavailable(format!(
                    "failed to construct HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            poll_interval,
            poll_timeout: Duration::from_secs(300),
        })
    }

    /// Override how long one job may stay pending before it is abandoned.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/language/analyze-text/jobs?api-version={API_VERSION}",
            self.endpoint.trim_end_matches('/')
        )
    }

    async fn submit(&self, text: &str) -> Result<String, SummarizationClientError> {
        let payload = json!({
            "displayName": "Document Abstractive Summarization",
            "analysisInput": {
                "documents": [{"id": "1", "language": "en", "text": text}]
            },
            "tasks": [{
                "kind": "AbstractiveSummarization",
                "taskName": "Document Abstractive Summarization"
            }]
        });

        let response = self
            .http
            .post(self.jobs_url())
            .header(SUBSCRIPTION_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.unreachable(error))?;
        let response = ensure_success(response).await?;
        response
            .headers()
            .get("operation-location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                SummarizationClientError::InvalidResponse(
                    "job accepted without an operation location".into(),
                )
            })
    }

    async fn poll(&self, job_url: &str) -> Result<JobState, SummarizationClientError> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(job_url)
                .header(SUBSCRIPTION_HEADER, &self.api_key)
                .send()
                .await
                .map_err(|error| self.unreachable(error))?;
            let state: JobState = ensure_success(response).await?.json().await.map_err(|error| {
                SummarizationClientError::InvalidResponse(format!(
                    "failed to decode job state: {error}"
                ))
            })?;
            match state.status.as_str() {
                "succeeded" | "partiallySucceeded" | "failed" | "cancelled" => return Ok(state),
                other => tracing::debug!(status = other, "Summarization job still running"),
            }
            if started.elapsed() >= self.poll_timeout {
                return Err(SummarizationClientError::GenerationFailed(format!(
                    "job still '{}' after {}s",
                    state.status,
                    self.poll_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn unreachable(&self, error: reqwest::Error) -> SummarizationClientError {
        SummarizationClientError::ProviderUnavailable(format!(
            "failed to reach language service at {}: {error}",
            self.endpoint
        ))
    }
}

#[async_trait]
impl SummarizationClient for LanguageSummarizationClient {
    async fn summarize_chunk(&self, text: &str) -> Result<ChunkSummary, SummarizationClientError> {
        let job_url = self.submit(text).await?;
        tracing::debug!(job = %job_url, "Summarization job submitted");
        let state = self.poll(&job_url).await?;
        interpret(state)
    }
}

fn interpret(state: JobState) -> Result<ChunkSummary, SummarizationClientError> {
    let results = state
        .tasks
        .and_then(|tasks| tasks.items.into_iter().next())
        .and_then(|item| item.results);

    let Some(results) = results else {
        let detail = state
            .errors
            .first()
            .map(|error| format!("{}: {}", error.code, error.message))
            .unwrap_or_else(|| format!("job ended '{}' without results", state.status));
        return Err(SummarizationClientError::GenerationFailed(detail));
    };

    if let Some(rejection) = results.errors.into_iter().next() {
        return Ok(ChunkSummary::Rejected {
            code: rejection.error.code,
            message: rejection.error.message,
        });
    }

    let document = results.documents.into_iter().next().ok_or_else(|| {
        SummarizationClientError::InvalidResponse("job succeeded without a document result".into())
    })?;
    let input_length = document
        .summaries
        .first()
        .and_then(|summary| summary.contexts.first())
        .map(|context| context.length)
        .unwrap_or_default();
    let summary_text = document
        .summaries
        .into_iter()
        .map(|summary| summary.text)
        .collect::<String>();

    Ok(ChunkSummary::Summarized {
        summary_text,
        input_length,
    })
}

async fn ensure_success(response: Response) -> Result<Response, SummarizationClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(SummarizationClientError::ProviderUnavailable(format!(
            "language service returned 404: {body}"
        )));
    }
    Err(SummarizationClientError::GenerationFailed(format!(
        "language service returned {status}: {body}"
    )))
}
