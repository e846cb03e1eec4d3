//! Typed field definitions and the canonical schema document.
//!
//! A schema maps field names to [`FieldSpec`]s. It is serialized to
//! canonical JSON (sorted keys, stable shape) and persisted next to the
//! data so an index can be re-opened and so cursors can be bound to the
//! exact schema they were created under.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Names a document may not declare as schema fields.
pub const RESERVED_NAMES: &[&str] = &["path", "created", "updated"];

/// The type of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Keyword,
    Text,
    Number,
    Date,
    Bool,
}

impl FieldType {
    /// Canonical lowercase name, as stored in the schema JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Bool => "bool",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a single indexed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// The field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Whether array values are accepted (keyword/number/date only).
    #[serde(default)]
    pub multi: bool,

    /// Relevance weight, positive and only meaningful for `text` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl FieldSpec {
    /// A plain single-valued field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            multi: false,
            weight: None,
        }
    }

    /// A text field with the given relevance weight.
    pub fn text(weight: f64) -> Self {
        Self {
            field_type: FieldType::Text,
            multi: false,
            weight: Some(weight),
        }
    }

    /// Marks the field as array-valued.
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }
}

/// A validated mapping from field name to [`FieldSpec`].
///
/// Backed by a `BTreeMap` so iteration order (and therefore the canonical
/// JSON form and the FTS column order) is the sorted field-name order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Field declarations, keyed by name.
    pub fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    /// Builds and validates a schema from field declarations.
    pub fn new(fields: BTreeMap<String, FieldSpec>) -> Result<Self> {
        let schema = Self { fields };
        schema.validate()?;
        Ok(schema)
    }

    /// Parses and validates a schema from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(json)
            .map_err(|e| Error::schema(format!("invalid schema document: {e}")))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Serializes to the canonical JSON form (sorted keys).
    pub fn to_canonical_json(&self) -> String {
        // BTreeMap iteration is sorted, and serde_json emits in iteration
        // order, so plain serialization is already canonical.
        serde_json::to_string(self).expect("schema serialization cannot fail")
    }

    /// Looks up a field declaration by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// The text fields in deterministic (sorted) order.
    pub fn text_fields(&self) -> Vec<(&str, &FieldSpec)> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.field_type == FieldType::Text)
            .map(|(name, spec)| (name.as_str(), spec))
            .collect()
    }

    /// Returns `true` if the schema declares at least one text field.
    pub fn has_text_fields(&self) -> bool {
        self.fields
            .values()
            .any(|s| s.field_type == FieldType::Text)
    }

    /// Validates every declaration against the schema rules.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::schema("schema declares no fields"));
        }
        for (name, spec) in &self.fields {
            if !valid_field_name(name) {
                return Err(Error::schema(format!("invalid field name: {name:?}")));
            }
            if RESERVED_NAMES.contains(&name.as_str()) {
                return Err(Error::schema(format!("reserved field name: {name}")));
            }
            if let Some(w) = spec.weight {
                if spec.field_type != FieldType::Text {
                    return Err(Error::schema(format!(
                        "field {name}: weight is only valid on text fields"
                    )));
                }
                if !(w > 0.0) {
                    return Err(Error::schema(format!(
                        "field {name}: weight must be positive (got {w})"
                    )));
                }
            }
            if spec.multi
                && !matches!(
                    spec.field_type,
                    FieldType::Keyword | FieldType::Number | FieldType::Date
                )
            {
                return Err(Error::schema(format!(
                    "field {name}: multi is only valid on keyword, number and date fields"
                )));
            }
        }
        Ok(())
    }

    /// Validates that `new` is an additive evolution of `self`.
    ///
    /// Every existing field must be present and unchanged; only new fields
    /// may appear. Shape reductions are not supported.
    pub fn validate_additive(&self, new: &Schema) -> Result<()> {
        new.validate()?;
        for (name, spec) in &self.fields {
            match new.fields.get(name) {
                None => {
                    return Err(Error::schema(format!(
                        "additive change cannot remove field {name}"
                    )));
                }
                Some(new_spec) if new_spec != spec => {
                    return Err(Error::schema(format!(
                        "additive change cannot alter field {name}"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Field names match `^[A-Za-z_][A-Za-z0-9_]*$`.
fn valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
