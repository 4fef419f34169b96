//! Declarative migration plans between two schema versions.

use crate::error::{ModelError, ModelResult};
use crate::schema::RecordSchema;
use medrec_types::FieldType;
use serde::{Deserialize, Serialize};

/// One transformation applied to every matching record's plaintext fields.
///
/// Steps execute in declaration order, so a merge after a type conversion
/// on the same field observes the converted value. Order is part of the
/// migration's contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationStep {
    /// Drop the field from the record. No effect if absent.
    Remove { field_id: String },
    /// Combine the field's value into another field, then drop it.
    Merge {
        field_id: String,
        into_field_id: String,
    },
    /// Convert the field's value to another type.
    TypeConvert { field_id: String, to_type: FieldType },
}

impl MigrationStep {
    /// The field this step primarily operates on.
    pub fn field_id(&self) -> &str {
        match self {
            Self::Remove { field_id }
            | Self::Merge { field_id, .. }
            | Self::TypeConvert { field_id, .. } => field_id,
        }
    }
}

/// Policy resolving value conflicts when a merge step combines two fields.
///
/// Migrations declare *that* fields merge; the caller chooses *how* at
/// execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Join both values textually as `target + separator + source`.
    Concatenate { separator: String },
    /// The source field's value wins when present.
    PreferSource,
    /// The target field keeps its value when present.
    PreferTarget,
}

/// A declarative transformation plan between two versions of one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMigration {
    /// Logical record type this migration targets.
    pub schema_id: String,
    pub from_version: u32,
    pub to_version: u32,
    /// Ordered transformation steps.
    pub steps: Vec<MigrationStep>,
}

impl SchemaMigration {
    pub fn new(schema_id: impl Into<String>, from_version: u32, to_version: u32) -> Self {
        Self {
            schema_id: schema_id.into(),
            from_version,
            to_version,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Whether any step is a merge (and therefore needs a merge strategy
    /// supplied at execution time).
    pub fn has_merge_step(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, MigrationStep::Merge { .. }))
    }

    /// Validates the plan against the schema version it starts from.
    ///
    /// Every referenced field must exist in the from-version schema, the
    /// version must strictly increase, and the plan must not be empty.
    pub fn validate(&self, from_schema: &RecordSchema) -> ModelResult<()> {
        if from_schema.id != self.schema_id {
            return Err(ModelError::SchemaMismatch {
                expected: self.schema_id.clone(),
                actual: from_schema.id.clone(),
            });
        }
        if from_schema.version != self.from_version {
            return Err(ModelError::VersionMismatch {
                expected: self.from_version,
                actual: from_schema.version,
            });
        }
        if self.to_version <= self.from_version {
            return Err(ModelError::NonIncreasingVersion {
                from: self.from_version,
                to: self.to_version,
            });
        }
        if self.steps.is_empty() {
            return Err(ModelError::EmptySteps);
        }

        for (index, step) in self.steps.iter().enumerate() {
            let mut check = |field_id: &str| -> ModelResult<()> {
                if from_schema.field(field_id).is_none() {
                    return Err(ModelError::UnknownField {
                        index,
                        field_id: field_id.to_string(),
                        version: self.from_version,
                    });
                }
                Ok(())
            };

            match step {
                MigrationStep::Remove { field_id } => check(field_id)?,
                MigrationStep::Merge {
                    field_id,
                    into_field_id,
                } => {
                    check(field_id)?;
                    check(into_field_id)?;
                    if field_id == into_field_id {
                        return Err(ModelError::MergeIntoSelf {
                            index,
                            field_id: field_id.clone(),
                        });
                    }
                }
                MigrationStep::TypeConvert { field_id, .. } => check(field_id)?,
            }
        }

        Ok(())
    }
}
