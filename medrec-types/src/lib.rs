//! Shared types for the medrec core.
//!
//! Identifier newtypes, field provenance, and the plaintext field value
//! model that record content decrypts into. Everything here is a plain
//! value type — behavior lives in the crates that consume them.

mod field;
mod ids;
mod provenance;

pub use field::{FieldMap, FieldType, FieldValue};
pub use ids::{CheckpointId, DeviceId, MemberId, MigrationId, RecordId};
pub use provenance::Provenance;
