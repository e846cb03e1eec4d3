//! Document field extraction against a schema.
//!
//! `prepare` turns raw JSON bytes into the typed sidecar values the write
//! path persists: presence rows, deduplicated keyword pairs, numbers,
//! dates, bools and text columns. The original JSON is kept verbatim for
//! storage and round-trip.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{FieldType, Schema};
use crate::time;

/// A document reduced to the typed values the index stores.
#[derive(Debug, Clone)]
pub struct PreparedDoc {
    /// The unique document path.
    pub path: String,
    /// The input JSON, stored verbatim.
    pub raw_json: String,
    /// Names of schema fields the document supplied with non-null values.
    pub present: Vec<String>,
    /// Deduplicated `(field, value)` keyword pairs.
    pub keywords: Vec<(String, String)>,
    /// `(field, value)` numeric postings.
    pub numbers: Vec<(String, f64)>,
    /// `(field, epoch_ms)` date postings.
    pub dates: Vec<(String, i64)>,
    /// `(field, value)` boolean flags, one per field.
    pub bools: Vec<(String, bool)>,
    /// `(field, text)` values destined for the FTS row.
    pub texts: Vec<(String, String)>,
}

/// Parses a JSON document and extracts its typed fields per the schema.
///
/// Top-level keys that are not schema fields are kept in the stored JSON
/// but are not indexed. Null values count as absent.
pub fn prepare(schema: &Schema, json: &str) -> Result<PreparedDoc> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::schema(format!("invalid document JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::schema("document must be a JSON object"))?;

    let path = match obj.get("path") {
        Some(Value::String(p)) if !p.is_empty() => p.clone(),
        Some(Value::String(_)) => return Err(Error::schema("path must be non-empty")),
        Some(_) => return Err(Error::schema("path must be a string")),
        None => return Err(Error::schema("document is missing path")),
    };

    let mut doc = PreparedDoc {
        path,
        raw_json: json.to_string(),
        present: Vec::new(),
        keywords: Vec::new(),
        numbers: Vec::new(),
        dates: Vec::new(),
        bools: Vec::new(),
        texts: Vec::new(),
    };

    let mut keyword_set: BTreeSet<(String, String)> = BTreeSet::new();

    for (name, spec) in &schema.fields {
        let Some(value) = obj.get(name) else { continue };
        if value.is_null() {
            continue;
        }
        match spec.field_type {
            FieldType::Keyword => {
                for v in scalars(name, value, spec.multi)? {
                    keyword_set.insert((name.clone(), keyword_value(name, v)?));
                }
            }
            FieldType::Number => {
                for v in scalars(name, value, spec.multi)? {
                    doc.numbers.push((name.clone(), number_value(name, v)?));
                }
            }
            FieldType::Date => {
                for v in scalars(name, value, spec.multi)? {
                    doc.dates.push((name.clone(), date_value(name, v)?));
                }
            }
            FieldType::Bool => {
                doc.bools.push((name.clone(), bool_value(name, value)?));
            }
            FieldType::Text => match value {
                Value::String(s) => doc.texts.push((name.clone(), s.clone())),
                _ => {
                    return Err(Error::schema(format!(
                        "field {name}: text value must be a string"
                    )));
                }
            },
        }
        doc.present.push(name.clone());
    }

    doc.keywords = keyword_set.into_iter().collect();
    Ok(doc)
}

/// Flattens a scalar-or-array value into its scalar elements.
fn scalars<'a>(name: &str, value: &'a Value, multi: bool) -> Result<Vec<&'a Value>> {
    match value {
        Value::Array(items) => {
            if !multi && items.len() > 1 {
                return Err(Error::schema(format!(
                    "field {name}: array value on a single-valued field"
                )));
            }
            for item in items {
                if item.is_array() || item.is_object() {
                    return Err(Error::schema(format!(
                        "field {name}: array elements must be scalars"
                    )));
                }
            }
            Ok(items.iter().collect())
        }
        Value::Object(_) => Err(Error::schema(format!(
            "field {name}: object values are not indexable"
        ))),
        other => Ok(vec![other]),
    }
}

/// Keyword values accept strings, numbers and bools, stringified.
fn keyword_value(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::schema(format!(
            "field {name}: keyword value must be a string, number or bool"
        ))),
    }
}

/// Number values accept JSON numbers and numeric strings. Only finite
/// values are indexable; NaN and infinities have no stable ordering in
/// the backing stores.
fn number_value(name: &str, value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            Error::schema(format!("field {name}: number out of range"))
        })?,
        Value::String(s) => s.parse::<f64>().map_err(|_| {
            Error::schema(format!("field {name}: cannot parse {s:?} as a number"))
        })?,
        _ => {
            return Err(Error::schema(format!(
                "field {name}: number value must be a number or numeric string"
            )));
        }
    };
    if !parsed.is_finite() {
        return Err(Error::schema(format!(
            "field {name}: number must be finite (got {parsed})"
        )));
    }
    Ok(parsed)
}

/// Date values accept date-literal strings (plain date or RFC 3339).
fn date_value(name: &str, value: &Value) -> Result<i64> {
    match value {
        Value::String(s) => time::parse_date_ms(s).ok_or_else(|| {
            Error::schema(format!("field {name}: cannot parse {s:?} as a date"))
        }),
        _ => Err(Error::schema(format!(
            "field {name}: date value must be a string"
        ))),
    }
}

/// Bool values accept JSON booleans and `"true"`/`"false"`.
fn bool_value(name: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(Error::schema(format!(
            "field {name}: bool value must be true or false"
        ))),
    }
}
