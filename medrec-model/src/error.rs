//! Definition-level validation errors.

use thiserror::Error;

/// Result type for schema/migration validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while validating schema or migration definitions.
///
/// All of these are setup errors: they are detected before any store or
/// codec access, so nothing has been touched when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("duplicate field id '{field_id}' in schema '{schema_id}'")]
    DuplicateFieldId { schema_id: String, field_id: String },

    #[error("migration targets schema '{expected}' but was given '{actual}'")]
    SchemaMismatch { expected: String, actual: String },

    #[error("migration starts from version {expected} but schema is at version {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("migration version must increase: {from} -> {to}")]
    NonIncreasingVersion { from: u32, to: u32 },

    #[error("migration declares no transformation steps")]
    EmptySteps,

    #[error("step {index} references field '{field_id}' not present in schema version {version}")]
    UnknownField {
        index: usize,
        field_id: String,
        version: u32,
    },

    #[error("step {index} merges field '{field_id}' into itself")]
    MergeIntoSelf { index: usize, field_id: String },
}
