//! Output size budget for persisted records.
//!
//! The record store rejects documents above a fixed size. The secondary extract duplicates the
//! primary text (twice, counting the per-page map), so it is the part given up: first the
//! per-page map, then the whole extract. The primary text and summary are never touched.

use crate::processing::types::DocumentRecord;

/// Default maximum serialized record size in bytes.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 2 * 1024 * 1024;

/// What the guard had to do to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeGuardOutcome {
    /// The record already fit.
    WithinBudget,
    /// The per-page secondary text was dropped.
    PrunedPages,
    /// The whole secondary extract was dropped.
    DroppedSecondary,
    /// Nothing left to drop and the record is still too large.
    StillOversized {
        /// Serialized size after all degradation steps.
        bytes: usize,
    },
}

/// Degrade `record` until it serializes to at most `max_bytes`, or nothing is left to drop.
pub fn enforce_size_limit(record: &mut DocumentRecord, max_bytes: usize) -> SizeGuardOutcome {
    let size = record.serialized_len();
    if size <= max_bytes {
        return SizeGuardOutcome::WithinBudget;
    }

    let mut outcome = SizeGuardOutcome::StillOversized { bytes: size };
    if let Some(secondary) = record.secondary_text_extract.as_mut() {
        if secondary.full_text_by_page.take().is_some() {
            let pruned = record.serialized_len();
            tracing::warn!(
                filename = %record.filename,
                before = size,
                after = pruned,
                max_bytes,
                "Record over size limit; dropped per-page secondary text"
            );
            if pruned <= max_bytes {
                return SizeGuardOutcome::PrunedPages;
            }
        }
    }

    if record.secondary_text_extract.take().is_some() {
        let dropped = record.serialized_len();
        tracing::warn!(
            filename = %record.filename,
            after = dropped,
            max_bytes,
            "Record over size limit; dropped secondary text extract"
        );
        if dropped <= max_bytes {
            return SizeGuardOutcome::DroppedSecondary;
        }
        outcome = SizeGuardOutcome::StillOversized { bytes: dropped };
    }

    tracing::warn!(
        filename = %record.filename,
        ?outcome,
        max_bytes,
        "Record remains over size limit after degradation"
    );
    outcome
}
