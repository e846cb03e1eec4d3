//! Field discovery and aggregate statistics.
//!
//! Value counts come from the keyword dictionary (optionally narrowed
//! by a scope query compiled to the usual CTE form). Numeric aggregates
//! are computed in Rust over the fetched values so both dialects agree
//! on min/max/avg/median semantics.

use serde::Serialize;

use ministore_core::schema::{FieldSpec, FieldType};
use ministore_core::{Cancel, Error, IndexOptions, Result, Schema};
use ministore_query::normalize::{normalize, Limits};
use ministore_query::plan::{Plan, Planner};
use ministore_query::{parser, ArgList, SqlValue};

use crate::contract::StorageDriver;

/// One keyword value with its document count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: i64,
}

/// Per-field discovery report.
#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub multi: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Documents carrying the field.
    pub count: i64,
    pub sample: FieldSample,
}

/// Type-specific sample attached to a field report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSample {
    Text,
    /// Top dictionary values by document count.
    Keyword(Vec<ValueCount>),
    Number { min: Option<f64>, max: Option<f64> },
    Date { min: Option<i64>, max: Option<i64> },
    Bool { true_count: i64, false_count: i64 },
}

/// Aggregate statistics over a numeric or date field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
    pub count: i64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub median: Option<f64>,
}

/// Compiles a scope query to its CTE form.
fn compile_scope(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    opts: &IndexOptions,
    scope: &str,
) -> Result<Plan> {
    let expr = parser::parse(scope)?;
    normalize(&expr, &Limits::from(opts))?;
    let planner = Planner::new(
        schema,
        driver.dialect(),
        opts.max_prefix_expansion,
        opts.now_ms(),
    );
    planner.compile(&expr)
}

fn with_ctes(plan: &Plan, body: &str) -> String {
    let ctes: Vec<String> = plan
        .ctes
        .iter()
        .map(|c| format!("{} AS ({})", c.name, c.sql))
        .collect();
    format!("WITH {} {body}", ctes.join(", "))
}

/// Ranks the distinct values of a keyword field by document count.
pub fn discover_values(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    opts: &IndexOptions,
    field: &str,
    scope: Option<&str>,
    top: usize,
    cancel: &Cancel,
) -> Result<Vec<ValueCount>> {
    cancel.check()?;
    match schema.field(field) {
        None => return Err(Error::UnknownField(field.to_string())),
        Some(spec) if spec.field_type != FieldType::Keyword => {
            return Err(Error::type_mismatch(
                field,
                format!(
                    "discover requires a keyword field, schema declares {}",
                    spec.field_type
                ),
            ));
        }
        Some(_) => {}
    }

    let (sql, values) = match scope {
        None => {
            let mut args = ArgList::new(driver.dialect().placeholder_style());
            let fph = args.push(SqlValue::Text(field.to_string()));
            (
                format!(
                    "SELECT value, doc_freq FROM kw_dict \
                     WHERE field = {fph} AND doc_freq > 0 \
                     ORDER BY doc_freq DESC, value ASC LIMIT {top}"
                ),
                args.into_values(),
            )
        }
        Some(scope) => {
            let mut plan = compile_scope(driver, schema, opts, scope)?;
            let fph = plan.args.push(SqlValue::Text(field.to_string()));
            let body = format!(
                "SELECT d.value, COUNT(DISTINCT p.item_id) AS n \
                 FROM kw_postings p JOIN kw_dict d ON d.id = p.value_id \
                 WHERE d.field = {fph} \
                 AND p.item_id IN (SELECT item_id FROM {}) \
                 GROUP BY d.value ORDER BY n DESC, d.value ASC LIMIT {top}",
                plan.result
            );
            (with_ctes(&plan, &body), plan.args.into_values())
        }
    };

    cancel.check()?;
    let rows = driver.query(&sql, &values)?;
    rows.iter()
        .map(|r| {
            Ok(ValueCount {
                value: r.str(0)?.to_string(),
                count: r.i64(1)?,
            })
        })
        .collect()
}

/// Reports every schema field with its presence count and a sample.
pub fn discover_fields(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    opts: &IndexOptions,
    cancel: &Cancel,
) -> Result<Vec<FieldInfo>> {
    let mut out = Vec::with_capacity(schema.fields.len());
    for (name, spec) in &schema.fields {
        cancel.check()?;
        let rows = driver.query(
            driver.templates().count_present,
            &[SqlValue::Text(name.clone())],
        )?;
        let count = rows.first().map(|r| r.i64(0)).transpose()?.unwrap_or(0);
        let sample = field_sample(driver, schema, opts, name, spec, cancel)?;
        out.push(FieldInfo {
            name: name.clone(),
            field_type: spec.field_type,
            multi: spec.multi,
            weight: spec.weight,
            count,
            sample,
        });
    }
    Ok(out)
}

fn field_sample(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    opts: &IndexOptions,
    name: &str,
    spec: &FieldSpec,
    cancel: &Cancel,
) -> Result<FieldSample> {
    let style = driver.dialect().placeholder_style();
    Ok(match spec.field_type {
        FieldType::Text => FieldSample::Text,
        FieldType::Keyword => FieldSample::Keyword(discover_values(
            driver, schema, opts, name, None, 5, cancel,
        )?),
        FieldType::Number => {
            let mut args = ArgList::new(style);
            let fph = args.push(SqlValue::Text(name.to_string()));
            let rows = driver.query(
                &format!(
                    "SELECT MIN(value), MAX(value) FROM field_number WHERE field = {fph}"
                ),
                args.values(),
            )?;
            match rows.first() {
                Some(r) => FieldSample::Number {
                    min: r.opt_f64(0)?,
                    max: r.opt_f64(1)?,
                },
                None => FieldSample::Number { min: None, max: None },
            }
        }
        FieldType::Date => {
            let mut args = ArgList::new(style);
            let fph = args.push(SqlValue::Text(name.to_string()));
            let rows = driver.query(
                &format!(
                    "SELECT MIN(value), MAX(value) FROM field_date WHERE field = {fph}"
                ),
                args.values(),
            )?;
            match rows.first() {
                Some(r) => FieldSample::Date {
                    min: r.opt_i64(0)?,
                    max: r.opt_i64(1)?,
                },
                None => FieldSample::Date { min: None, max: None },
            }
        }
        FieldType::Bool => {
            let count_where = |driver: &mut dyn StorageDriver, want: i64| -> Result<i64> {
                let mut args = ArgList::new(style);
                let fph = args.push(SqlValue::Text(name.to_string()));
                let vph = args.push(SqlValue::Int(want));
                let rows = driver.query(
                    &format!(
                        "SELECT COUNT(*) FROM field_bool WHERE field = {fph} AND value = {vph}"
                    ),
                    args.values(),
                )?;
                rows.first().map(|r| r.i64(0)).transpose().map(|v| v.unwrap_or(0))
            };
            FieldSample::Bool {
                true_count: count_where(driver, 1)?,
                false_count: count_where(driver, 0)?,
            }
        }
    })
}

/// Computes count/min/max/avg/median over a numeric or date field,
/// optionally restricted to the documents matched by a scope query.
pub fn stats(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    opts: &IndexOptions,
    field: &str,
    scope: Option<&str>,
    cancel: &Cancel,
) -> Result<FieldStats> {
    cancel.check()?;

    enum Source {
        Sidecar(&'static str),
        ItemsColumn(&'static str),
    }

    let source = match field {
        "created" => Source::ItemsColumn("created_at_ms"),
        "updated" => Source::ItemsColumn("updated_at_ms"),
        _ => match schema.field(field) {
            None => return Err(Error::UnknownField(field.to_string())),
            Some(spec) => match spec.field_type {
                FieldType::Number => Source::Sidecar("field_number"),
                FieldType::Date => Source::Sidecar("field_date"),
                other => {
                    return Err(Error::type_mismatch(
                        field,
                        format!(
                            "stats requires a number or date field, schema declares {other}"
                        ),
                    ));
                }
            },
        },
    };

    let plan = match scope {
        None => None,
        Some(scope) => Some(compile_scope(driver, schema, opts, scope)?),
    };

    let (sql, values) = match (&source, plan) {
        (Source::Sidecar(table), None) => {
            let mut args = ArgList::new(driver.dialect().placeholder_style());
            let fph = args.push(SqlValue::Text(field.to_string()));
            (
                format!("SELECT value FROM {table} WHERE field = {fph}"),
                args.into_values(),
            )
        }
        (Source::Sidecar(table), Some(mut plan)) => {
            let fph = plan.args.push(SqlValue::Text(field.to_string()));
            let body = format!(
                "SELECT value FROM {table} WHERE field = {fph} \
                 AND item_id IN (SELECT item_id FROM {})",
                plan.result
            );
            (with_ctes(&plan, &body), plan.args.into_values())
        }
        (Source::ItemsColumn(col), None) => {
            (format!("SELECT {col} FROM items"), Vec::new())
        }
        (Source::ItemsColumn(col), Some(plan)) => {
            let body = format!(
                "SELECT {col} FROM items WHERE id IN (SELECT item_id FROM {})",
                plan.result
            );
            (with_ctes(&plan, &body), plan.args.into_values())
        }
    };

    cancel.check()?;
    let rows = driver.query(&sql, &values)?;
    let mut values: Vec<f64> = rows
        .iter()
        .map(|r| r.f64(0))
        .collect::<Result<_>>()?;
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    if values.is_empty() {
        return Ok(FieldStats {
            count: 0,
            min: None,
            max: None,
            avg: None,
            median: None,
        });
    }

    let n = values.len();
    let sum: f64 = values.iter().sum();
    let median = if n % 2 == 1 {
        values[(n - 1) / 2]
    } else {
        (values[(n - 1) / 2] + values[n / 2]) / 2.0
    };
    Ok(FieldStats {
        count: n as i64,
        min: Some(values[0]),
        max: Some(values[n - 1]),
        avg: Some(sum / n as f64),
        median: Some(median),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{with_tx, StorageDriver};
    use crate::sqlite::SqliteDriver;
    use crate::write;
    use ministore_core::document::prepare;
    use ministore_core::schema::FieldSpec;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn schema() -> Schema {
        let mut fields = BTreeMap::new();
        fields.insert("tags".into(), FieldSpec::new(FieldType::Keyword).multi());
        fields.insert("priority".into(), FieldSpec::new(FieldType::Number));
        fields.insert("due".into(), FieldSpec::new(FieldType::Date));
        Schema::new(fields).unwrap()
    }

    fn seeded() -> (SqliteDriver, Schema) {
        let schema = schema();
        let mut d = SqliteDriver::open_in_memory().unwrap();
        d.create_tables().unwrap();
        let docs = [
            r#"{"path":"/1","tags":["a","b"],"priority":1,"due":"2025-01-01"}"#,
            r#"{"path":"/2","tags":["a"],"priority":2}"#,
            r#"{"path":"/3","tags":["a","c"],"priority":3,"due":"2025-03-01"}"#,
            r#"{"path":"/4","tags":["b"],"priority":4}"#,
        ];
        for (i, json) in docs.iter().enumerate() {
            let doc = prepare(&schema, json).unwrap();
            with_tx(&mut d, |d| write::put_tx(d, &schema, &doc, i as i64 + 1)).unwrap();
        }
        (d, schema)
    }

    #[test]
    fn values_ranked_by_count_then_value() {
        let (mut d, schema) = seeded();
        let opts = IndexOptions::default();
        let values = discover_values(
            &mut d,
            &schema,
            &opts,
            "tags",
            None,
            10,
            &Cancel::never(),
        )
        .unwrap();
        let pairs: Vec<(String, i64)> = values
            .iter()
            .map(|v| (v.value.clone(), v.count))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), 3),
                ("b".to_string(), 2),
                ("c".to_string(), 1)
            ]
        );
    }

    #[test]
    fn top_limits_value_list() {
        let (mut d, schema) = seeded();
        let opts = IndexOptions::default();
        let values = discover_values(
            &mut d,
            &schema,
            &opts,
            "tags",
            None,
            1,
            &Cancel::never(),
        )
        .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, "a");
    }

    #[test]
    fn values_require_keyword_field() {
        let (mut d, schema) = seeded();
        let opts = IndexOptions::default();
        let err = discover_values(
            &mut d,
            &schema,
            &opts,
            "priority",
            None,
            5,
            &Cancel::never(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
        let err = discover_values(&mut d, &schema, &opts, "nope", None, 5, &Cancel::never())
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_field");
    }

    #[test]
    fn stats_over_dates_are_epoch_ms_floats() {
        let (mut d, schema) = seeded();
        let opts = IndexOptions::default();
        let stats = stats(&mut d, &schema, &opts, "due", None, &Cancel::never()).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, Some(1_735_689_600_000.0));
        assert_eq!(stats.max, Some(1_740_787_200_000.0));
    }

    #[test]
    fn stats_over_pseudo_fields() {
        let (mut d, schema) = seeded();
        let opts = IndexOptions::default();
        let stats = stats(&mut d, &schema, &opts, "updated", None, &Cancel::never()).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(4.0));
        assert_eq!(stats.median, Some(2.5));
    }

    #[test]
    fn stats_scope_narrows_contributions() {
        let (mut d, schema) = seeded();
        let opts = IndexOptions::default();
        let stats = stats(
            &mut d,
            &schema,
            &opts,
            "priority",
            Some("tags:a"),
            &Cancel::never(),
        )
        .unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(3.0));
        assert_eq!(stats.avg, Some(2.0));
        assert_eq!(stats.median, Some(2.0));
    }

    #[test]
    fn empty_stats_have_no_aggregates() {
        let schema = schema();
        let mut d = SqliteDriver::open_in_memory().unwrap();
        d.create_tables().unwrap();
        let opts = IndexOptions::default();
        let stats = stats(&mut d, &schema, &opts, "priority", None, &Cancel::never()).unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.min, None);
        assert_eq!(stats.median, None);
    }
}
