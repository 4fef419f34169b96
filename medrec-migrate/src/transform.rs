//! Transformation semantics over decrypted field maps.

use medrec_model::{MergeStrategy, MigrationStep};
use medrec_types::{FieldMap, FieldType, FieldValue};

/// A transformation failure, scoped to one field of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub field_id: String,
    pub reason: String,
}

/// Applies every step, in declared order, to a copy of a record's fields.
///
/// Step order is observable: a merge after a type conversion on the same
/// field sees the converted value. Any step failure voids the whole record
/// — the caller persists nothing and the original stays as-is.
pub fn apply_steps(
    fields: &FieldMap,
    steps: &[MigrationStep],
    strategy: Option<&MergeStrategy>,
) -> Result<FieldMap, TransformError> {
    let mut out = fields.clone();
    for step in steps {
        match step {
            MigrationStep::Remove { field_id } => {
                out.remove(field_id);
            }
            MigrationStep::Merge {
                field_id,
                into_field_id,
            } => {
                let strategy = strategy.ok_or_else(|| TransformError {
                    field_id: field_id.clone(),
                    reason: "no merge strategy supplied".into(),
                })?;
                apply_merge(&mut out, field_id, into_field_id, strategy);
            }
            MigrationStep::TypeConvert { field_id, to_type } => {
                if let Some(value) = out.get(field_id) {
                    let converted =
                        convert_value(value, *to_type).map_err(|reason| TransformError {
                            field_id: field_id.clone(),
                            reason,
                        })?;
                    out.insert(field_id.clone(), converted);
                }
            }
        }
    }
    Ok(out)
}

/// Combines `field_id` into `into_field_id` per the strategy, then removes
/// the source field.
fn apply_merge(fields: &mut FieldMap, field_id: &str, into_field_id: &str, strategy: &MergeStrategy) {
    let source = fields.remove(field_id);
    match strategy {
        MergeStrategy::Concatenate { separator } => {
            let target = fields.get(into_field_id).filter(|v| !v.is_empty()).cloned();
            let source = source.filter(|v| !v.is_empty());
            match (target, source) {
                (Some(t), Some(s)) => {
                    let joined =
                        format!("{}{}{}", t.display_string(), separator, s.display_string());
                    fields.insert(into_field_id.to_string(), FieldValue::Text(joined));
                }
                (None, Some(s)) => {
                    fields.insert(into_field_id.to_string(), s);
                }
                // Only the target has data (or neither does): leave it be.
                _ => {}
            }
        }
        MergeStrategy::PreferSource => {
            if let Some(s) = source {
                fields.insert(into_field_id.to_string(), s);
            }
        }
        MergeStrategy::PreferTarget => {
            if !fields.contains_key(into_field_id) {
                if let Some(s) = source {
                    fields.insert(into_field_id.to_string(), s);
                }
            }
        }
    }
}

/// Best-effort lossless conversion of one value to another type.
///
/// Returns a human-readable reason on failure; the caller turns that into
/// a field-scoped record error.
pub fn convert_value(value: &FieldValue, to_type: FieldType) -> Result<FieldValue, String> {
    if value.field_type() == to_type {
        return Ok(value.clone());
    }
    match (value, to_type) {
        (v, FieldType::Text) => Ok(FieldValue::Text(v.display_string())),
        (FieldValue::Text(s), FieldType::Integer) => s
            .trim()
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| format!("'{s}' is not an integer")),
        (FieldValue::Text(s), FieldType::Double) => s
            .trim()
            .parse::<f64>()
            .map(FieldValue::Double)
            .map_err(|_| format!("'{s}' is not a number")),
        (FieldValue::Text(s), FieldType::Boolean) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(FieldValue::Boolean(true)),
            "false" => Ok(FieldValue::Boolean(false)),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        (FieldValue::Text(s), FieldType::Date) => chrono::DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| FieldValue::Date(dt.with_timezone(&chrono::Utc)))
            .map_err(|_| format!("'{s}' is not an RFC 3339 date")),
        (FieldValue::Integer(n), FieldType::Double) => Ok(FieldValue::Double(*n as f64)),
        (FieldValue::Double(d), FieldType::Integer) => {
            if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                Ok(FieldValue::Integer(*d as i64))
            } else {
                Err(format!("{d} has no exact integer representation"))
            }
        }
        (v, to) => Err(format!("cannot convert {} to {}", v.field_type(), to)),
    }
}
