//! HTTP client for the document intelligence "prebuilt-read" model.
//!
//! Analysis is asynchronous on the service side: the document is posted once, the service
//! answers `202 Accepted` with an `Operation-Location` header, and the client polls that URL
//! until the operation reaches a terminal state.

use super::{ExtractionClientError, PrimaryExtraction, PrimaryExtractor};
use crate::processing::types::ExtractionStatus;
use async_trait::async_trait;
use reqwest::{Client, Response, header::CONTENT_TYPE};
use serde::Deserialize;
use std::time::{Duration, Instant};

const API_VERSION: &str = "2023-07-31";
const MODEL_ID: &str = "prebuilt-read";
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Client for the OCR service.
pub struct DocumentIntelligenceClient {
    http: Client,
    endpoint: String,
    api_key: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    pages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl DocumentIntelligenceClient {
    /// Build a client for the service at `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self, ExtractionClientError> {
        let http = Client::builder().user_agent("docsum/ocr").build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            poll_interval,
            poll_timeout: Duration::from_secs(300),
        })
    }

    /// Override how long a single analysis may stay pending before it is abandoned.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/formrecognizer/documentModels/{MODEL_ID}:analyze?api-version={API_VERSION}",
            self.endpoint.trim_end_matches('/')
        )
    }

    async fn submit(&self, bytes: &[u8]) -> Result<String, ExtractionClientError> {
        let response = self
            .http
            .post(self.analyze_url())
            .header(SUBSCRIPTION_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        let response = ensure_success(response).await?;
        response
            .headers()
            .get("operation-location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(ExtractionClientError::MissingOperationLocation)
    }

    async fn poll(&self, operation_url: &str) -> Result<AnalyzeOperation, ExtractionClientError> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(operation_url)
                .header(SUBSCRIPTION_HEADER, &self.api_key)
                .send()
                .await?;
            let operation: AnalyzeOperation = ensure_success(response).await?.json().await?;
            match operation.status.as_str() {
                "succeeded" | "failed" => return Ok(operation),
                other => {
                    tracing::debug!(status = other, "Text extraction still running");
                }
            }
            if started.elapsed() >= self.poll_timeout {
                return Err(ExtractionClientError::InvalidResponse(format!(
                    "analysis still '{}' after {}s",
                    operation.status,
                    self.poll_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl PrimaryExtractor for DocumentIntelligenceClient {
    async fn extract_primary(
        &self,
        bytes: &[u8],
    ) -> Result<PrimaryExtraction, ExtractionClientError> {
        let operation_url = self.submit(bytes).await?;
        tracing::debug!(operation = %operation_url, "Text extraction submitted");
        let operation = self.poll(&operation_url).await?;

        if operation.status == "failed" {
            let detail = operation
                .error
                .map(|error| format!("{}: {}", error.code, error.message))
                .unwrap_or_else(|| "no error detail".into());
            return Err(ExtractionClientError::InvalidResponse(format!(
                "analysis failed ({detail})"
            )));
        }

        let result = operation.analyze_result.ok_or_else(|| {
            ExtractionClientError::InvalidResponse("succeeded without analyzeResult".into())
        })?;
        Ok(PrimaryExtraction {
            status: ExtractionStatus::Succeeded,
            page_count: result.pages.len(),
            text: result.content,
        })
    }
}

async fn ensure_success(response: Response) -> Result<Response, ExtractionClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ExtractionClientError::UnexpectedStatus { status, body })
}
