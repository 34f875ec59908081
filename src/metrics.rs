use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing enrichment activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    documents_unchanged: AtomicU64,
    documents_failed: AtomicU64,
    chunks_summarized: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document whose record was rewritten, with the number of summary chunks submitted.
    pub fn record_processed(&self, chunk_count: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_summarized
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a document whose existing record already held every artifact.
    pub fn record_unchanged(&self) {
        self.documents_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that ended with an error record or no write at all.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_unchanged: self.documents_unchanged.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_summarized: self.chunks_summarized.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of enrichment counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents whose record was created or updated.
    pub documents_processed: u64,
    /// Documents skipped because nothing was missing.
    pub documents_unchanged: u64,
    /// Documents that ended in an error record or a refused run.
    pub documents_failed: u64,
    /// Summarization submissions across all processed documents.
    pub chunks_summarized: u64,
}
