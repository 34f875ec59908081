//! Document enrichment pipeline: reconciliation, chunked summarization, classification, and the
//! output size guard.

pub mod chunking;
pub mod classify;
mod service;
pub mod size_guard;
pub mod state;
pub mod summarize;
pub mod types;

pub use classify::{ClassificationTerms, match_classification};
pub use service::{Collaborators, EnrichmentService, ProcessOutcome, Reconciliation};
pub use size_guard::{SizeGuardOutcome, enforce_size_limit};
pub use state::{MissingArtifacts, RecordState};
pub use summarize::{ChunkedSummarizer, SummaryReport};
pub use types::{DocumentRecord, FileType, ProcessingError, ReconcileError, SourceFile};
