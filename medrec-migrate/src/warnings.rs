//! Warning rules evaluated over decrypted record content.
//!
//! These are pure functions over the same data a real run operates on, so
//! a preview's warnings and an execution's per-record outcomes agree. In
//! particular, conversion failures are predicted with the exact conversion
//! used during execution.

use crate::transform::convert_value;
use medrec_model::{MigrationStep, RecordSchema, SchemaMigration};
use medrec_types::FieldMap;

/// Computes the warnings a run of this migration would surface.
///
/// `decrypted` holds the field maps of every matching record that could be
/// decrypted; `undecryptable` counts those that could not.
pub fn compute_warnings(
    migration: &SchemaMigration,
    to_schema: &RecordSchema,
    decrypted: &[FieldMap],
    undecryptable: usize,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if undecryptable > 0 {
        warnings.push(format!(
            "{undecryptable} records could not be decrypted and will fail migration"
        ));
    }

    for step in &migration.steps {
        match step {
            MigrationStep::Remove { field_id } => {
                if to_schema.field(field_id).is_some_and(|f| f.required) {
                    warnings.push(format!("removing required field '{field_id}'"));
                }
            }
            MigrationStep::Merge { into_field_id, .. } => {
                let occupied = decrypted
                    .iter()
                    .filter(|fields| fields.get(into_field_id).is_some_and(|v| !v.is_empty()))
                    .count();
                if occupied > 0 {
                    warnings.push(format!(
                        "{occupied} records have existing data in target field \
                         '{into_field_id}'; merge strategy will apply"
                    ));
                }
            }
            MigrationStep::TypeConvert { field_id, to_type } => {
                let failing = decrypted
                    .iter()
                    .filter(|fields| {
                        fields
                            .get(field_id)
                            .is_some_and(|v| convert_value(v, *to_type).is_err())
                    })
                    .count();
                if failing > 0 {
                    warnings.push(format!(
                        "{failing} records have values in field '{field_id}' that cannot \
                         be converted to {to_type}"
                    ));
                }
            }
        }
    }

    warnings
}
