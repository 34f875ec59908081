//! Enrichment service coordinating extraction, classification, summarization, and persistence.

use crate::{
    config::PipelineSettings,
    extraction::{
        PageTextExtractor, PrimaryExtractor, SecondaryExtractor,
        email::{AttachmentStore, EmailParser, extract_email},
    },
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        classify::{ClassificationTerms, match_classification},
        size_guard::{SizeGuardOutcome, enforce_size_limit},
        state::{MissingArtifacts, RecordState},
        summarize::{ChunkedSummarizer, now_rfc3339},
        types::{
            DocumentRecord, ExtractionStatus, FileType, ProcessingError, ReconcileError,
            SourceFile, TextExtractMetadata,
        },
    },
    retry::retry_with_backoff,
    store::RecordStore,
    summarization::SummarizationClient,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// External systems the service talks to.
pub struct Collaborators {
    /// Record persistence.
    pub store: Arc<dyn RecordStore>,
    /// OCR service.
    pub primary: Arc<dyn PrimaryExtractor>,
    /// Local page-by-page PDF extraction.
    pub pages: Arc<dyn PageTextExtractor>,
    /// Email container parser.
    pub email_parser: Arc<dyn EmailParser>,
    /// Sink for email attachments.
    pub attachments: Arc<dyn AttachmentStore>,
    /// Abstractive summarization service.
    pub summarizer: Arc<dyn SummarizationClient>,
}

/// Result of reconciling a file against its stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The stored record already held every artifact; nothing ran and nothing needs writing.
    Unchanged(Box<DocumentRecord>),
    /// A new version of the record was produced and should be persisted.
    Updated {
        /// The new record version.
        record: Box<DocumentRecord>,
        /// What the size guard did to it.
        size: SizeGuardOutcome,
        /// Summarization submissions made while producing it.
        chunk_count: usize,
    },
}

/// Outcome of [`EnrichmentService::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The stored record was complete.
    Unchanged,
    /// A new record version was written.
    Updated {
        /// Version now stored.
        record_version: u32,
        /// What the size guard did before writing.
        size: SizeGuardOutcome,
    },
    /// The run failed and an error record was written in its place.
    ErrorRecorded {
        /// Message stored under `error.exception`.
        error: String,
    },
}

/// Brings stored enrichment records up to date with the artifacts they are required to hold.
///
/// Each call handles one file as a single sequential run: store lookup, reconciliation of the
/// stored record, then persistence. Only the stages whose artifacts are missing are executed.
/// Construct the service once near process start and share it through an `Arc`.
pub struct EnrichmentService {
    store: Arc<dyn RecordStore>,
    primary: Arc<dyn PrimaryExtractor>,
    secondary: SecondaryExtractor,
    email_parser: Arc<dyn EmailParser>,
    attachments: Arc<dyn AttachmentStore>,
    summarizer: ChunkedSummarizer,
    classifications: ClassificationTerms,
    settings: PipelineSettings,
    metrics: Arc<PipelineMetrics>,
}

impl EnrichmentService {
    /// Assemble the service from its collaborators.
    pub fn new(
        collaborators: Collaborators,
        classifications: ClassificationTerms,
        settings: PipelineSettings,
    ) -> Self {
        tracing::info!(
            classification_terms = classifications.len(),
            max_chunk_chars = settings.max_chunk_chars,
            max_record_bytes = settings.max_record_bytes,
            "Initializing enrichment service"
        );
        let summarizer = ChunkedSummarizer::new(
            collaborators.summarizer,
            settings.summary_retry,
            settings.max_chunk_chars,
        );
        Self {
            store: collaborators.store,
            primary: collaborators.primary,
            secondary: SecondaryExtractor::new(collaborators.pages),
            email_parser: collaborators.email_parser,
            attachments: collaborators.attachments,
            summarizer,
            classifications,
            settings,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Retrieve the current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Process one file end to end: look up, reconcile, persist.
    ///
    /// Stage failures are logged and converted into an error record so the store always
    /// reflects the latest attempt. Returns an error when the run was refused (duplicate
    /// records, unsupported type), when the store lookup failed, or when even the fallback
    /// error record could not be written. A failed lookup writes nothing: without the stored
    /// record there is no id to write under, and a fresh one would duplicate the filename.
    pub async fn process(
        &self,
        file: &SourceFile,
        run_id: &str,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let span = tracing::info_span!("document", filename = %file.filename, run_id);
        self.process_inner(file, run_id).instrument(span).await
    }

    async fn process_inner(
        &self,
        file: &SourceFile,
        run_id: &str,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let function_start = now_rfc3339();
        tracing::info!(filepath = %file.filepath, "Processing file");

        let existing = match self.store.find_by_filename(&file.filename).await {
            Ok(records) => records,
            Err(error) => {
                tracing::error!(error = %error, "Record lookup failed; nothing written");
                self.metrics.record_failed();
                return Err(error.into());
            }
        };

        match self.reconcile(existing, file, run_id).await {
            Ok(Reconciliation::Unchanged(_)) => {
                self.metrics.record_unchanged();
                Ok(ProcessOutcome::Unchanged)
            }
            Ok(Reconciliation::Updated {
                record,
                size,
                chunk_count,
            }) => match self.store.upsert(&record).await {
                Ok(()) => {
                    self.metrics.record_processed(chunk_count as u64);
                    tracing::info!(
                        record_version = record.record_version,
                        ?size,
                        "Record written"
                    );
                    Ok(ProcessOutcome::Updated {
                        record_version: record.record_version,
                        size,
                    })
                }
                Err(error) => {
                    tracing::error!(error = %error, "Failed to write record; writing error record");
                    let message = ProcessingError::from(error).to_string();
                    self.persist_minimal(&record, file, run_id, &function_start, message)
                        .await
                }
            },
            Err(ReconcileError {
                record: Some(record),
                source,
            }) => {
                self.record_failure(record, file, run_id, &function_start, source)
                    .await
            }
            Err(ReconcileError {
                record: None,
                source,
            }) => {
                tracing::error!(error = %source, "Refusing to process file");
                self.metrics.record_failed();
                Err(source)
            }
        }
    }

    /// Write the partial record carrying `error.exception`, or a minimal one if that fails.
    async fn record_failure(
        &self,
        mut record: Box<DocumentRecord>,
        file: &SourceFile,
        run_id: &str,
        function_start: &str,
        error: ProcessingError,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let message = error.to_string();
        tracing::error!(error = %message, "Document run failed");

        record.error.insert("exception".into(), message.clone());
        match self.store.upsert(&record).await {
            Ok(()) => {
                self.metrics.record_failed();
                Ok(ProcessOutcome::ErrorRecorded { error: message })
            }
            Err(store_error) => {
                tracing::error!(
                    error = %store_error,
                    "Failed to write partial record; writing error record"
                );
                self.persist_minimal(&record, file, run_id, function_start, message)
                    .await
            }
        }
    }

    /// Replace the stored record with a bare one that keeps its id and version.
    async fn persist_minimal(
        &self,
        record: &DocumentRecord,
        file: &SourceFile,
        run_id: &str,
        function_start: &str,
        message: String,
    ) -> Result<ProcessOutcome, ProcessingError> {
        let mut minimal = DocumentRecord::minimal_error(
            record.id.clone(),
            file,
            run_id,
            Some(function_start.to_string()),
            message.clone(),
        );
        minimal.record_version = record.record_version;
        self.store.upsert(&minimal).await?;
        self.metrics.record_failed();
        Ok(ProcessOutcome::ErrorRecorded { error: message })
    }

    /// Bring the stored record for `file` up to date.
    ///
    /// `existing` is the store's result for the filename. More than one record is refused
    /// without any work. A complete record comes back untouched. Otherwise the missing stages
    /// run in order (extraction, classification, summarization), the version is bumped, and the
    /// size guard is applied. A failing stage returns the record as built so far.
    pub async fn reconcile(
        &self,
        existing: Vec<DocumentRecord>,
        file: &SourceFile,
        run_id: &str,
    ) -> Result<Reconciliation, ReconcileError> {
        let run_started = Instant::now();
        let function_start = now_rfc3339();

        let file_type = file.file_type().ok_or_else(|| {
            ReconcileError::refused(ProcessingError::UnsupportedFileType {
                filename: file.filename.clone(),
                extension: file.extension.clone(),
            })
        })?;
        if existing.len() > 1 {
            return Err(ReconcileError::refused(ProcessingError::DuplicateRecords {
                filename: file.filename.clone(),
                count: existing.len(),
            }));
        }

        let existing = existing.into_iter().next();
        let state = RecordState::assess(existing.as_ref(), file_type);
        let missing = state.missing(file_type);

        let mut record = match existing {
            Some(record) if state == RecordState::Complete => {
                tracing::info!(
                    record_version = record.record_version,
                    "Record already complete; nothing to do"
                );
                return Ok(Reconciliation::Unchanged(Box::new(record)));
            }
            Some(mut record) => {
                tracing::info!(
                    record_version = record.record_version,
                    missing_text = missing.text,
                    missing_filemarkings = missing.filemarkings,
                    missing_secondary = missing.secondary,
                    missing_summary = missing.summary,
                    "Record incomplete; regenerating missing artifacts"
                );
                let archived = (missing.text || missing.summary)
                    .then(|| record.archive_error())
                    .flatten();
                if let Some(key) = archived {
                    tracing::info!(archive = %key, "Archived previous run's errors");
                }
                record.record_version += 1;
                record
            }
            None => {
                tracing::info!("No record for file; creating one");
                DocumentRecord::new(Uuid::new_v4().to_string(), file, run_id)
            }
        };
        record.current_version_invocation_id = run_id.to_string();
        record.timestamps.function_start = Some(function_start);

        let chunk_count = match self
            .run_stages(&mut record, file, file_type, missing, run_started)
            .await
        {
            Ok(chunk_count) => chunk_count,
            Err(error) => return Err(ReconcileError::with_record(record, error)),
        };

        let size = enforce_size_limit(&mut record, self.settings.max_record_bytes);
        Ok(Reconciliation::Updated {
            record: Box::new(record),
            size,
            chunk_count,
        })
    }

    async fn run_stages(
        &self,
        record: &mut DocumentRecord,
        file: &SourceFile,
        file_type: FileType,
        missing: MissingArtifacts,
        run_started: Instant,
    ) -> Result<usize, ProcessingError> {
        if missing.text {
            self.extract_text(record, file, file_type).await?;
        }

        if missing.secondary && file_type.needs_secondary_extract() {
            tracing::info!("Running secondary extraction");
            let extract = self
                .secondary
                .extract(&file.bytes, self.settings.secondary_extract_timeout)
                .await;
            record.secondary_text_extract = Some(extract);
        }

        if missing.filemarkings {
            self.classify(record);
        }

        if !missing.summary {
            return Ok(0);
        }
        self.summarize(record, run_started).await
    }

    async fn extract_text(
        &self,
        record: &mut DocumentRecord,
        file: &SourceFile,
        file_type: FileType,
    ) -> Result<(), ProcessingError> {
        let timer = Instant::now();
        record.timestamps.extraction_start = Some(now_rfc3339());
        tracing::info!(?file_type, "Extracting text");

        let (text, status, page_count) = match file_type {
            FileType::Pdf | FileType::Word => {
                let policy = &self.settings.ocr_retry;
                let extraction = retry_with_backoff(policy, "text extraction", || {
                    self.primary.extract_primary(&file.bytes)
                })
                .await?;
                (extraction.text, extraction.status, Some(extraction.page_count))
            }
            FileType::Text => {
                let text = String::from_utf8(file.bytes.clone())?;
                let status = status_for(&text);
                (text, status, None)
            }
            FileType::Email => {
                let (body, properties) = extract_email(
                    self.email_parser.as_ref(),
                    self.attachments.as_ref(),
                    &file.bytes,
                    &file.filename,
                )
                .await?;
                record.email_properties = Some(properties);
                let status = status_for(&body);
                (body, status, None)
            }
        };

        record.textextract_metadata = TextExtractMetadata {
            length: Some(text.chars().count()),
            status: Some(status),
            page_count: page_count.filter(|_| file_type.has_pages()),
        };
        record.fulltextextract = text;
        record.timestamps.extraction_finish = Some(now_rfc3339());
        record.timestamps.extraction_duration = Some(timer.elapsed().as_secs_f64());
        tracing::info!(
            status = %status,
            length = record.textextract_metadata.length,
            "Text extraction complete"
        );
        Ok(())
    }

    fn classify(&self, record: &mut DocumentRecord) {
        let from_primary = match_classification(&record.fulltextextract, &self.classifications);
        let markings = from_primary.or_else(|| {
            record
                .secondary_text_extract
                .as_ref()
                .filter(|extract| !extract.full_text.is_empty())
                .and_then(|extract| match_classification(&extract.full_text, &self.classifications))
        });
        if let Some(found) = &markings {
            tracing::info!(classification = %found.classification, "Classification found");
        } else {
            tracing::info!("No classification marking found");
        }
        record.filemarkings = markings;
    }

    async fn summarize(
        &self,
        record: &mut DocumentRecord,
        run_started: Instant,
    ) -> Result<usize, ProcessingError> {
        let status = record.textextract_metadata.status.unwrap_or_else(|| {
            // Records written before statuses were stored.
            status_for(&record.fulltextextract)
        });

        if status != ExtractionStatus::Succeeded {
            tracing::error!("Text extraction failed; skipping summarization");
            record
                .error
                .insert("text_extraction_status".into(), status.to_string());
            record
                .error
                .insert("summary_skipped".into(), "text extraction failed".into());
            return Ok(0);
        }
        if record.fulltextextract.trim().is_empty() {
            tracing::error!("No extractable text found; skipping summarization");
            record
                .error
                .insert("summary_skipped".into(), "no extractable text".into());
            return Ok(0);
        }

        let timer = Instant::now();
        record.timestamps.summary_start = Some(now_rfc3339());
        tracing::info!("Beginning summarization");

        let report = self.summarizer.summarize(&record.fulltextextract).await?;

        record.abstractsummary = report.summary;
        record.summarization_metadata = report.metadata;
        record.abstractsummary_parts = report.parts;
        record.timestamps.parts = report.part_timestamps;
        record.error.extend(report.errors);
        record.timestamps.summary_finish = Some(now_rfc3339());
        record.timestamps.summary_duration = Some(timer.elapsed().as_secs_f64());
        record.timestamps.total_duration = Some(run_started.elapsed().as_secs_f64());
        tracing::info!(
            summary_length = record.abstractsummary.chars().count(),
            chunks = report.chunk_count,
            "Summarization complete"
        );
        Ok(report.chunk_count)
    }
}

fn status_for(text: &str) -> ExtractionStatus {
    if text.is_empty() {
        ExtractionStatus::Failed
    } else {
        ExtractionStatus::Succeeded
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extraction::{
            ExtractionClientError, PrimaryExtraction,
            email::{EmailContainerParser, EmailError},
        },
        processing::types::{FileMarkings, SecondaryTextExtract},
        retry::RetryPolicy,
        store::StoreError,
        summarization::{ChunkSummary, SummarizationClientError},
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<DocumentRecord>>,
        failing_reads: AtomicBool,
        failing_writes: AtomicUsize,
        writes: AtomicUsize,
    }

    impl MemoryStore {
        fn seeded(records: Vec<DocumentRecord>) -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(records),
                ..Self::default()
            })
        }

        fn all(&self) -> Vec<DocumentRecord> {
            self.records.lock().expect("lock").clone()
        }
    }

    fn store_failure(message: &str) -> StoreError {
        StoreError::Io {
            path: "memory".into(),
            source: std::io::Error::other(message.to_string()),
        }
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn find_by_filename(
            &self,
            filename: &str,
        ) -> Result<Vec<DocumentRecord>, StoreError> {
            if self.failing_reads.load(Ordering::SeqCst) {
                return Err(store_failure("unreadable record"));
            }
            Ok(self
                .all()
                .into_iter()
                .filter(|record| record.filename == filename)
                .collect())
        }

        async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError> {
            let decrement = |left: usize| left.checked_sub(1);
            let failing = self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, decrement);
            if failing.is_ok() {
                return Err(store_failure("request too large"));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().expect("lock");
            records.retain(|stored| stored.id != record.id);
            records.push(record.clone());
            Ok(())
        }
    }

    struct FakeOcr {
        text: String,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeOcr {
        fn returning(text: &str) -> Arc<Self> {
            Arc::new(Self {
                text: text.into(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                text: String::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PrimaryExtractor for FakeOcr {
        async fn extract_primary(
            &self,
            _bytes: &[u8],
        ) -> Result<PrimaryExtraction, ExtractionClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExtractionClientError::InvalidResponse("service down".into()));
            }
            Ok(PrimaryExtraction {
                status: ExtractionStatus::Succeeded,
                text: self.text.clone(),
                page_count: 2,
            })
        }
    }

    struct FakePages(&'static str);

    impl PageTextExtractor for FakePages {
        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<String>, String> {
            Ok(vec![self.0.to_string()])
        }
    }

    #[derive(Default)]
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SummarizationClient for CountingSummarizer {
        async fn summarize_chunk(
            &self,
            text: &str,
        ) -> Result<ChunkSummary, SummarizationClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChunkSummary::Summarized {
                summary_text: format!("summary of {} chars", text.chars().count()),
                input_length: text.chars().count(),
            })
        }
    }

    #[derive(Default)]
    struct NoAttachments;

    #[async_trait]
    impl AttachmentStore for NoAttachments {
        async fn put(&self, _path: &str, _data: &[u8]) -> Result<(), EmailError> {
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        ocr: Arc<FakeOcr>,
        summarizer: Arc<CountingSummarizer>,
        service: EnrichmentService,
    }

    fn settings() -> PipelineSettings {
        let no_retry = RetryPolicy::new(Duration::ZERO, Duration::ZERO, Duration::ZERO);
        PipelineSettings {
            secondary_extract_timeout: Duration::from_secs(5),
            max_chunk_chars: 1_000,
            max_record_bytes: 1_000_000,
            ocr_retry: no_retry,
            summary_retry: no_retry,
        }
    }

    fn harness(store: Arc<MemoryStore>, ocr: Arc<FakeOcr>, pages: &'static str) -> Harness {
        let summarizer = Arc::new(CountingSummarizer::default());
        let service = EnrichmentService::new(
            Collaborators {
                store: store.clone(),
                primary: ocr.clone(),
                pages: Arc::new(FakePages(pages)),
                email_parser: Arc::new(EmailContainerParser),
                attachments: Arc::new(NoAttachments),
                summarizer: summarizer.clone(),
            },
            ClassificationTerms::new(["SECRET", "TOP SECRET"]),
            settings(),
        );
        Harness {
            store,
            ocr,
            summarizer,
            service,
        }
    }

    fn empty_store() -> Arc<MemoryStore> {
        MemoryStore::seeded(Vec::new())
    }

    fn pdf() -> SourceFile {
        SourceFile::new("raw/inputdocs/team/report.pdf", b"%PDF-1.7".to_vec())
    }

    fn markings(classification: &str) -> Option<FileMarkings> {
        Some(FileMarkings {
            classification: classification.into(),
            containing_line: classification.into(),
        })
    }

    fn secondary(text: &str) -> Option<SecondaryTextExtract> {
        Some(SecondaryTextExtract {
            full_text: text.into(),
            ..SecondaryTextExtract::default()
        })
    }

    /// A version-3 PDF record holding text, summary, markings, and secondary extract.
    fn stored_pdf(file: &SourceFile, text: &str) -> DocumentRecord {
        let mut record = DocumentRecord::new("rec-1".into(), file, "run-0");
        record.record_version = 3;
        record.fulltextextract = text.into();
        record.textextract_metadata.status = Some(ExtractionStatus::Succeeded);
        record.abstractsummary = "stored summary".into();
        record.filemarkings = markings("SECRET");
        record.secondary_text_extract = secondary(text);
        record
    }

    fn has_archived_errors(record: &DocumentRecord) -> bool {
        record
            .extra
            .keys()
            .any(|key| key.starts_with("error_archive_v"))
    }

    #[tokio::test]
    async fn new_pdf_gets_every_artifact_then_is_left_alone() {
        let text = "TOP SECRET\nBody";
        let h = harness(empty_store(), FakeOcr::returning(text), text);

        let first = h.service.process(&pdf(), "run-1").await.expect("processed");
        assert!(matches!(
            first,
            ProcessOutcome::Updated {
                record_version: 1,
                ..
            }
        ));

        let stored = h.store.all();
        assert_eq!(stored.len(), 1);
        let record = &stored[0];
        assert_eq!(record.filename, "report.pdf");
        assert_eq!(record.filetype, ".pdf");
        assert_eq!(record.fulltextextract, "TOP SECRET\nBody");
        assert_eq!(record.textextract_metadata.page_count, Some(2));
        let found = record.filemarkings.as_ref().expect("markings");
        assert_eq!(found.classification, "TOP SECRET");
        assert_eq!(record.abstractsummary, "summary of 15 chars");
        let secondary_text = record
            .secondary_text_extract
            .as_ref()
            .map(|extract| extract.full_text.as_str());
        assert_eq!(secondary_text, Some("TOP SECRET\nBody"));
        assert_eq!(record.current_version_invocation_id, "run-1");
        assert!(record.error.is_empty());

        let second = h.service.process(&pdf(), "run-2").await.expect("processed");
        assert_eq!(second, ProcessOutcome::Unchanged);
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.all()[0].record_version, 1);

        let snapshot = h.service.metrics_snapshot();
        assert_eq!(snapshot.documents_processed, 1);
        assert_eq!(snapshot.documents_unchanged, 1);
    }

    #[tokio::test]
    async fn missing_summary_reruns_only_summarization_and_archives_errors() {
        let file = pdf();
        let mut existing = stored_pdf(&file, "SECRET\nplans");
        existing.abstractsummary.clear();
        existing
            .error
            .insert("exception".into(), "summarization timed out".into());

        let h = harness(empty_store(), FakeOcr::returning("unused"), "unused");
        let outcome = h
            .service
            .reconcile(vec![existing], &file, "run-4")
            .await
            .expect("reconciled");

        let Reconciliation::Updated { record, .. } = outcome else {
            panic!("expected an update");
        };
        assert_eq!(record.id, "rec-1");
        assert_eq!(record.record_version, 4);
        assert_eq!(record.current_version_invocation_id, "run-4");
        assert_eq!(record.abstractsummary, "summary of 12 chars");
        assert!(record.error.is_empty());
        let archived = record.archived_error(3).expect("archived");
        assert_eq!(
            archived.get("exception").and_then(|v| v.as_str()),
            Some("summarization timed out")
        );
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(record.fulltextextract, "SECRET\nplans");
    }

    #[tokio::test]
    async fn missing_secondary_reruns_only_the_local_extractor() {
        let file = pdf();
        let mut existing = stored_pdf(&file, "SECRET\nplans");
        existing.secondary_text_extract = None;
        existing
            .error
            .insert("exception".into(), "secondary extraction timed out".into());

        let pages = "SECRET\nplans";
        let h = harness(empty_store(), FakeOcr::returning("unused"), pages);
        let outcome = h
            .service
            .reconcile(vec![existing], &file, "run-4")
            .await
            .expect("reconciled");

        let Reconciliation::Updated {
            record,
            chunk_count,
            ..
        } = outcome
        else {
            panic!("expected an update");
        };
        assert_eq!(chunk_count, 0);
        assert_eq!(record.record_version, 4);
        let secondary_text = record
            .secondary_text_extract
            .as_ref()
            .map(|extract| extract.full_text.as_str());
        assert_eq!(secondary_text, Some("SECRET\nplans"));
        assert_eq!(
            record.error.get("exception").map(String::as_str),
            Some("secondary extraction timed out")
        );
        assert!(!has_archived_errors(&record));
        assert_eq!(record.abstractsummary, "stored summary");
        assert_eq!(record.filemarkings, markings("SECRET"));
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_markings_rerun_only_classification() {
        let file = pdf();
        let mut existing = stored_pdf(&file, "TOP SECRET\nplans");
        existing.filemarkings = None;
        existing
            .error
            .insert("summary_skipped".into(), "left from an older run".into());

        let h = harness(empty_store(), FakeOcr::returning("unused"), "unused");
        let outcome = h
            .service
            .reconcile(vec![existing], &file, "run-4")
            .await
            .expect("reconciled");

        let Reconciliation::Updated { record, .. } = outcome else {
            panic!("expected an update");
        };
        assert_eq!(record.record_version, 4);
        let found = record.filemarkings.as_ref().expect("markings");
        assert_eq!(found.classification, "TOP SECRET");
        assert_eq!(found.containing_line, "TOP SECRET");
        assert_eq!(
            record.error.get("summary_skipped").map(String::as_str),
            Some("left from an older run")
        );
        assert!(!has_archived_errors(&record));
        let unchanged = secondary("TOP SECRET\nplans");
        assert_eq!(record.secondary_text_extract, unchanged);
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_records_are_refused_without_writes() {
        let file = pdf();
        let store = MemoryStore::seeded(vec![
            DocumentRecord::new("a".into(), &file, "r"),
            DocumentRecord::new("b".into(), &file, "r"),
        ]);
        let h = harness(store, FakeOcr::returning("text"), "text");

        let error = h.service.process(&file, "run").await.expect_err("refused");
        assert!(matches!(error, ProcessingError::DuplicateRecords { count: 2, .. }));
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.service.metrics_snapshot().documents_failed, 1);
    }

    #[tokio::test]
    async fn failed_lookup_returns_the_store_error_without_writing() {
        let file = pdf();
        let store = MemoryStore::seeded(vec![stored_pdf(&file, "SECRET\nplans")]);
        store.failing_reads.store(true, Ordering::SeqCst);
        let h = harness(store, FakeOcr::returning("text"), "text");

        let result = h.service.process(&file, "run").await;
        assert!(matches!(result, Err(ProcessingError::Store(_))));
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.all().len(), 1);
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.service.metrics_snapshot().documents_failed, 1);
    }

    #[tokio::test]
    async fn empty_text_file_skips_summary_with_reason() {
        let h = harness(empty_store(), FakeOcr::returning(""), "");
        let file = SourceFile::new("raw/notes.txt", Vec::new());

        let outcome = h.service.reconcile(Vec::new(), &file, "run").await;
        let Ok(Reconciliation::Updated {
            record,
            chunk_count,
            ..
        }) = outcome
        else {
            panic!("expected an update");
        };
        assert_eq!(chunk_count, 0);
        assert_eq!(
            record.textextract_metadata.status,
            Some(ExtractionStatus::Failed)
        );
        assert_eq!(
            record.error.get("summary_skipped").map(String::as_str),
            Some("text extraction failed")
        );
        assert_eq!(
            record.error.get("text_extraction_status").map(String::as_str),
            Some("failed")
        );
        assert!(record.secondary_text_extract.is_none());
        assert!(record.textextract_metadata.page_count.is_none());
    }

    #[tokio::test]
    async fn whitespace_only_extraction_skips_summary() {
        let h = harness(empty_store(), FakeOcr::returning("  \n "), "");
        let outcome = h.service.reconcile(Vec::new(), &pdf(), "run").await;
        let Ok(Reconciliation::Updated { record, .. }) = outcome else {
            panic!("expected an update");
        };
        assert_eq!(
            record.error.get("summary_skipped").map(String::as_str),
            Some("no extractable text")
        );
        assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn extraction_failure_writes_partial_record_with_exception() {
        let h = harness(empty_store(), FakeOcr::failing(), "");
        let outcome = h.service.process(&pdf(), "run-1").await.expect("recorded");

        let ProcessOutcome::ErrorRecorded { error } = outcome else {
            panic!("expected an error record");
        };
        assert!(error.contains("service down"));
        let stored = h.store.all();
        assert_eq!(stored.len(), 1);
        let exception = stored[0].error.get("exception").expect("exception");
        assert!(exception.contains("service down"));
        assert!(stored[0].timestamps.function_start.is_some());
        assert_eq!(stored[0].filename, "report.pdf");
    }

    #[tokio::test]
    async fn failed_write_falls_back_to_minimal_record() {
        let store = empty_store();
        store.failing_writes.store(1, Ordering::SeqCst);
        let h = harness(store, FakeOcr::returning("Body"), "Body");

        let outcome = h.service.process(&pdf(), "run-1").await.expect("fallback");

        let ProcessOutcome::ErrorRecorded { error } = outcome else {
            panic!("expected an error record");
        };
        assert!(error.contains("request too large"));
        let stored = h.store.all();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].fulltextextract.is_empty());
        assert!(stored[0].error.contains_key("exception"));
        assert_eq!(stored[0].current_version_invocation_id, "run-1");
    }

    #[tokio::test]
    async fn classification_falls_back_to_secondary_text() {
        let h = harness(
            empty_store(),
            FakeOcr::returning("scanned image with no markings"),
            "SECRET//NOFORN\npage text",
        );
        let outcome = h.service.reconcile(Vec::new(), &pdf(), "run").await;
        let Ok(Reconciliation::Updated { record, .. }) = outcome else {
            panic!("expected an update");
        };
        let found = record.filemarkings.expect("markings");
        assert_eq!(found.classification, "SECRET");
        assert_eq!(found.containing_line, "SECRET//NOFORN");
    }

    #[tokio::test]
    async fn email_body_and_properties_are_recorded() {
        let h = harness(empty_store(), FakeOcr::returning("unused"), "");
        let message = "From: a@example.com\nTo: Bo <b@example.com>\nSubject: Hi\n\nHello there";
        let file = SourceFile::new("raw/mail/hello.eml", message.as_bytes().to_vec());

        let outcome = h.service.reconcile(Vec::new(), &file, "run").await;
        let Ok(Reconciliation::Updated { record, .. }) = outcome else {
            panic!("expected an update");
        };
        assert_eq!(record.fulltextextract, "Hello there");
        let properties = record.email_properties.expect("properties");
        assert_eq!(properties.email_subject, "Hi");
        assert_eq!(properties.recipient_emails, vec!["b@example.com"]);
        assert!(record.secondary_text_extract.is_none());
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_type_is_refused() {
        let h = harness(empty_store(), FakeOcr::returning(""), "");
        let file = SourceFile::new("raw/sheet.xlsx", Vec::new());
        let error = h.service.process(&file, "run").await.expect_err("refused");
        assert!(matches!(error, ProcessingError::UnsupportedFileType { .. }));
        assert_eq!(h.store.writes.load(Ordering::SeqCst), 0);
    }
}
