//! Persistence of [`DocumentRecord`]s keyed by filename.

pub mod file;

use crate::processing::types::DocumentRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use file::FileRecordStore;

/// Errors raised by record store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    #[error("Record store I/O failed at {path}: {source}")]
    Io {
        /// Location being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A stored document could not be decoded, or a record could not be encoded.
    #[error("Record store document {path} is not a valid record: {source}")]
    Serialization {
        /// Location of the document.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Document store holding one enrichment record per filename.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record whose `filename` equals `filename`. More than one indicates corruption.
    async fn find_by_filename(&self, filename: &str) -> Result<Vec<DocumentRecord>, StoreError>;

    /// Insert or replace the record with the same `id`.
    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError>;
}
