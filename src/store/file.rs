//! Directory-backed record store: one `{id}.json` document per record.

use super::{RecordStore, StoreError};
use crate::processing::types::DocumentRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// [`RecordStore`] writing pretty-printed JSON documents into a directory.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(io_error(&root))?;
        tracing::debug!(root = %root.display(), "Opened record store");
        Ok(Self { root })
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read_record(path: &Path) -> Result<DocumentRecord, StoreError> {
        let bytes = tokio::fs::read(path).await.map_err(io_error(path))?;
        serde_json::from_slice(&bytes)
            .map_err(serialization_error(path))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn serialization_error(path: &Path) -> impl FnOnce(serde_json::Error) -> StoreError + '_ {
    move |source| StoreError::Serialization {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn find_by_filename(&self, filename: &str) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(io_error(&self.root))?;
        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.root))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let record = Self::read_record(&path).await?;
            if record.filename == filename {
                matches.push(record);
            }
        }
        // Directory order is unspecified; keep results stable for callers.
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let path = self.document_path(&record.id);
        let body = serde_json::to_vec_pretty(record)
            .map_err(serialization_error(&path))?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, body)
            .await
            .map_err(io_error(&staging))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(io_error(&path))?;
        tracing::debug!(id = %record.id, filename = %record.filename, "Record written");
        Ok(())
    }
}
