//! Storage error types.

use medrec_types::{CheckpointId, RecordId};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the record and checkpoint stores.
///
/// "Not found" is deliberately distinct from database failure: callers
/// (the migration engine in particular) treat a missing record as a
/// per-record data error and a database failure as infrastructure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointId),

    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
