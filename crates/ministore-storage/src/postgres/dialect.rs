//! [`QueryDialect`] implementation for Postgres full-text search.
//!
//! Text columns are pre-tokenized `tsvector`s named `fts_<field>`. The
//! `$n` placeholder style lets one bound query string feed several
//! match and rank expressions.

use ministore_core::{Result, Schema};
use ministore_query::{ArgList, PlaceholderStyle, QueryDialect, SqlValue, TextPred};

/// Stateless dialect handle.
pub struct PostgresDialect;

/// Shared instance returned by the driver.
pub static DIALECT: PostgresDialect = PostgresDialect;

/// Column name for a text field's tsvector.
pub fn fts_column(field: &str) -> String {
    format!("fts_{field}")
}

fn tsquery(ph: &str) -> String {
    format!("plainto_tsquery('simple', {ph})")
}

impl QueryDialect for PostgresDialect {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }

    fn fts_match_sql(
        &self,
        pred: &TextPred,
        schema: &Schema,
        args: &mut ArgList,
    ) -> Result<String> {
        let ph = args.push(SqlValue::Text(pred.query.clone()));
        let q = tsquery(&ph);
        let clause = match &pred.field {
            Some(field) => format!("\"{}\" @@ {q}", fts_column(field)),
            None => schema
                .text_fields()
                .iter()
                .map(|(name, _)| format!("\"{}\" @@ {q}", fts_column(name)))
                .collect::<Vec<_>>()
                .join(" OR "),
        };
        Ok(format!("SELECT item_id FROM search WHERE {clause}"))
    }

    fn fts_score_sql(
        &self,
        preds: &[TextPred],
        schema: &Schema,
        args: &mut ArgList,
    ) -> Result<String> {
        let mut score_terms = Vec::new();
        let mut match_terms = Vec::new();
        for pred in preds {
            let ph = args.push(SqlValue::Text(pred.query.clone()));
            let q = tsquery(&ph);
            let targets: Vec<(String, f64)> = match &pred.field {
                Some(field) => {
                    let weight = schema
                        .field(field)
                        .and_then(|s| s.weight)
                        .unwrap_or(1.0);
                    vec![(fts_column(field), weight)]
                }
                None => schema
                    .text_fields()
                    .iter()
                    .map(|(name, spec)| (fts_column(name), spec.weight.unwrap_or(1.0)))
                    .collect(),
            };
            for (col, weight) in targets {
                score_terms.push(format!(
                    "CASE WHEN \"{col}\" @@ {q} \
                     THEN ts_rank(\"{col}\", {q}) * {weight} ELSE 0 END"
                ));
                match_terms.push(format!("\"{col}\" @@ {q}"));
            }
        }
        Ok(format!(
            "SELECT item_id, ({})::float8 AS s FROM search WHERE {}",
            score_terms.join(" + "),
            match_terms.join(" OR ")
        ))
    }

    fn order_desc_nulls_last(&self, expr: &str) -> String {
        // Postgres sorts NULL first under DESC without the qualifier.
        format!("{expr} DESC NULLS LAST")
    }
}
