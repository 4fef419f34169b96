//! Versioned schema migration engine for encrypted records.
//!
//! Transforms one member's records from one field schema version to
//! another while every record stays encrypted at rest. The engine never
//! sees key material beyond an opaque borrowed [`medrec_crypto::KeyHandle`]
//! and never performs network I/O.
//!
//! # Architecture
//!
//! - [`MigrationEngine`] orchestrates: it fetches matching records from an
//!   injected [`medrec_storage::RecordStore`], projects plaintext through a
//!   [`medrec_crypto::RecordCodec`], applies the migration's transformation
//!   steps, and persists re-encrypted payloads.
//! - Execution is checkpoint-first: the original encrypted payload of every
//!   matched record is durably saved to a
//!   [`medrec_storage::CheckpointStore`] before the first mutation. A
//!   failed checkpoint aborts the run with nothing touched.
//! - Record failures are isolated: a malformed record is reported in the
//!   [`MigrationResult`] and the run continues. Partial completion is a
//!   valid terminal state — readers already tolerate mixed schema versions.
//! - [`MigrationEngine::preview`] computes the same warnings a real run
//!   would, without mutating anything.
//!
//! Rollback is manual: callers restore a checkpoint explicitly via
//! [`MigrationEngine::restore_checkpoint`].

mod engine;
mod error;
mod report;
mod transform;
mod warnings;

pub use engine::{ExecuteOptions, MigrationEngine};
pub use error::{MigrateError, MigrateResult};
pub use report::{MigrationPreview, MigrationProgress, MigrationRecordError, MigrationResult};
pub use transform::{apply_steps, convert_value, TransformError};
pub use warnings::compute_warnings;
