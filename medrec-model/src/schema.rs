//! Record schemas — the field set for one logical record type at one version.

use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use medrec_types::{FieldType, Provenance};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether a field is shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldVisibility {
    Active,
    Hidden,
}

/// A declarative constraint on a field's plaintext value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    MinLength { chars: usize },
    MaxLength { chars: usize },
    Range { min: f64, max: f64 },
}

/// One field in a record schema.
///
/// The identifier is stable across schema versions unless a migration
/// explicitly removes the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: String,
    pub display_name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub display_order: u32,
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
    pub visibility: FieldVisibility,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FieldDefinition {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        field_type: FieldType,
        provenance: Provenance,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: display_name.into(),
            field_type,
            required: false,
            display_order: 0,
            validation: Vec::new(),
            visibility: FieldVisibility::Active,
            provenance,
            created_at: now,
            updated_at: now,
        }
    }

    /// A built-in field, attributable to no device.
    pub fn system(
        id: impl Into<String>,
        display_name: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self::new(id, display_name, field_type, Provenance::System)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visibility = FieldVisibility::Hidden;
        self
    }

    pub fn with_display_order(mut self, order: u32) -> Self {
        self.display_order = order;
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation.push(rule);
        self
    }
}

/// The field set for one logical record type (e.g. "vaccine") at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Logical record type identifier, e.g. "vaccine".
    pub id: String,
    pub display_name: String,
    pub fields: Vec<FieldDefinition>,
    pub built_in: bool,
    /// Monotonic non-negative schema version.
    pub version: u32,
}

impl RecordSchema {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            fields: Vec::new(),
            built_in: false,
            version,
        }
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn built_in(mut self) -> Self {
        self.built_in = true;
        self
    }

    /// Look up a field definition by identifier.
    pub fn field(&self, field_id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    /// Checks the schema-level invariant: field identifiers are unique.
    pub fn validate(&self) -> ModelResult<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.id.as_str()) {
                return Err(ModelError::DuplicateFieldId {
                    schema_id: self.id.clone(),
                    field_id: field.id.clone(),
                });
            }
        }
        Ok(())
    }
}
