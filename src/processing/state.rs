//! What a stored record still lacks.
//!
//! The missing-artifact set is computed once, up front, from the record as it was read. Stage
//! gating in the service consults this value instead of re-inspecting the record as it changes.

use crate::processing::types::{DocumentRecord, FileType};

/// Artifacts a record needs before it is complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingArtifacts {
    /// Primary extracted text is absent or empty.
    pub text: bool,
    /// Classification markings need computing.
    pub filemarkings: bool,
    /// Secondary extract is absent or empty (PDF only).
    pub secondary: bool,
    /// Abstractive summary is absent or empty.
    pub summary: bool,
}

impl MissingArtifacts {
    /// Everything, as for a record that does not exist yet.
    pub fn all(file_type: FileType) -> Self {
        Self {
            text: true,
            filemarkings: true,
            secondary: file_type.needs_secondary_extract(),
            summary: true,
        }
    }

    /// Whether nothing is missing.
    pub fn is_empty(&self) -> bool {
        !(self.text || self.filemarkings || self.secondary || self.summary)
    }
}

/// Reconciliation state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// No record exists for the filename.
    New,
    /// Every required artifact is present.
    Complete,
    /// Some artifacts must be (re)generated.
    Incomplete(MissingArtifacts),
}

impl RecordState {
    /// Assess `existing` (the single stored record, if any) for a file of `file_type`.
    pub fn assess(existing: Option<&DocumentRecord>, file_type: FileType) -> Self {
        let Some(record) = existing else {
            return Self::New;
        };

        let text = record.fulltextextract.is_empty();
        let filemarkings = text
            || record
                .filemarkings
                .as_ref()
                .is_none_or(|markings| markings.classification.is_empty());
        let secondary = file_type.needs_secondary_extract()
            && record
                .secondary_text_extract
                .as_ref()
                .is_none_or(|extract| extract.full_text.is_empty());
        let summary = record.abstractsummary.is_empty();

        let missing = MissingArtifacts {
            text,
            filemarkings,
            secondary,
            summary,
        };
        if missing.is_empty() {
            Self::Complete
        } else {
            Self::Incomplete(missing)
        }
    }

    /// Artifacts to produce in this run.
    pub fn missing(&self, file_type: FileType) -> MissingArtifacts {
        match self {
            Self::New => MissingArtifacts::all(file_type),
            Self::Complete => MissingArtifacts::default(),
            Self::Incomplete(missing) => *missing,
        }
    }
}
