//! [`QueryDialect`] implementation for SQLite / FTS5.

use ministore_core::{Result, Schema};
use ministore_query::{ArgList, PlaceholderStyle, QueryDialect, SqlValue, TextPred};

/// Stateless dialect handle.
pub struct SqliteDialect;

/// Shared instance returned by the driver.
pub static DIALECT: SqliteDialect = SqliteDialect;

/// Quotes words for an FTS5 MATCH expression; adjacent words must all
/// match (FTS5 implicit AND). A field scope becomes a column filter.
fn match_expr(pred: &TextPred) -> String {
    let words: Vec<String> = pred
        .query
        .split_whitespace()
        .map(|w| format!("\"{}\"", w.replace('"', "\"\"")))
        .collect();
    let joined = words.join(" ");
    match &pred.field {
        Some(field) => format!("{field} : ({joined})"),
        None => joined,
    }
}

impl QueryDialect for SqliteDialect {
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }

    fn fts_match_sql(
        &self,
        pred: &TextPred,
        _schema: &Schema,
        args: &mut ArgList,
    ) -> Result<String> {
        let ph = args.push(SqlValue::Text(match_expr(pred)));
        Ok(format!(
            "SELECT rowid AS item_id FROM search WHERE search MATCH {ph}"
        ))
    }

    fn fts_score_sql(
        &self,
        preds: &[TextPred],
        schema: &Schema,
        args: &mut ArgList,
    ) -> Result<String> {
        // bm25 weights follow the text columns in their deterministic
        // (sorted) order; bm25 reports lower-is-better, hence the negation.
        let weights: String = schema
            .text_fields()
            .iter()
            .map(|(_, spec)| format!(", {}", spec.weight.unwrap_or(1.0)))
            .collect();
        let combined = preds
            .iter()
            .map(|p| format!("({})", match_expr(p)))
            .collect::<Vec<_>>()
            .join(" OR ");
        let ph = args.push(SqlValue::Text(combined));
        Ok(format!(
            "SELECT rowid AS item_id, -bm25(search{weights}) AS s \
             FROM search WHERE search MATCH {ph}"
        ))
    }

    fn order_desc_nulls_last(&self, expr: &str) -> String {
        // SQLite sorts NULL smallest, so plain DESC already puts it last.
        format!("{expr} DESC")
    }
}
