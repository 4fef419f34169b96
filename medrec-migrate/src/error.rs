//! Engine error types.

use medrec_model::ModelError;
use medrec_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Hard failures of a whole `preview` or `execute` call.
///
/// Definition problems and a missing merge strategy are rejected before any
/// store access. A checkpoint save failure aborts the run before the first
/// record mutation. Per-record failures are never represented here — they
/// are folded into the result's error list instead.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("invalid migration definition: {0}")]
    Definition(#[from] ModelError),

    #[error("migration contains a merge step but no merge strategy was supplied")]
    MissingMergeStrategy,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("checkpoint could not be saved: {0}")]
    Checkpoint(#[source] StorageError),
}
