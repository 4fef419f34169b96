//! Invocation-scoped reporting types.
//!
//! All of these are owned by one engine call: a preview forecast, interim
//! progress snapshots handed to the caller's callback, and the terminal
//! result. None of them is persisted.

use chrono::{DateTime, Utc};
use medrec_model::SchemaMigration;
use medrec_types::{CheckpointId, MigrationId, RecordId};
use serde::Serialize;

/// Read-only forecast of what an execution would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPreview {
    /// Records that would be migrated.
    pub matching_records: usize,
    /// First match in record-id order, for UI preview. Absent when nothing
    /// matches.
    pub sample_record_id: Option<RecordId>,
    pub warnings: Vec<String>,
}

/// Snapshot of a run in flight, emitted after every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationProgress {
    pub total_records: usize,
    /// Monotonically increasing across one run, failures included.
    pub processed_records: usize,
    pub current_record_id: RecordId,
}

/// One record-level failure. Does not abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecordError {
    pub record_id: RecordId,
    /// The offending field, when the failure is field-scoped.
    pub field_id: Option<String>,
    pub reason: String,
}

/// Terminal outcome of one execution.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub migration: SchemaMigration,
    pub migration_id: MigrationId,
    /// Checkpoint guarding this run; absent only when no record matched
    /// and nothing was written.
    pub checkpoint_id: Option<CheckpointId>,
    pub records_processed: usize,
    pub records_succeeded: usize,
    pub records_failed: usize,
    pub errors: Vec<MigrationRecordError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MigrationResult {
    /// True iff no record failed. A run with failures is still a valid
    /// terminal state — failed records simply stay at the old version.
    pub fn succeeded(&self) -> bool {
        self.records_failed == 0
    }
}
