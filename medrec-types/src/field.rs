//! Plaintext field values.
//!
//! A decrypted record is a map from field identifier to [`FieldValue`].
//! The map is ordered (BTreeMap) so that serialization and iteration are
//! deterministic across devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decrypted record content: field identifier → value.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// The type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Double,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One plaintext field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Double(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
}

impl FieldValue {
    /// The schema type this value conforms to.
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Text(_) => FieldType::Text,
            Self::Integer(_) => FieldType::Integer,
            Self::Double(_) => FieldType::Double,
            Self::Date(_) => FieldType::Date,
            Self::Boolean(_) => FieldType::Boolean,
        }
    }

    /// Borrow the inner string if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Human rendering of the value, used when fields are combined textually.
    pub fn display_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Integer(n) => n.to_string(),
            Self::Double(d) => d.to_string(),
            Self::Date(ts) => ts.to_rfc3339(),
            Self::Boolean(b) => b.to_string(),
        }
    }

    /// Whether the value counts as "no data" for merge purposes.
    /// Only an empty text value is empty; every other value carries data.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }
}
