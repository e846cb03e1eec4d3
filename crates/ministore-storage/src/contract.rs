//! The storage adapter contract.
//!
//! A [`StorageDriver`] binds the dialect-neutral core to one SQL engine:
//! it exposes the placeholder dialect the planner compiles against, a
//! table of parameterized single-row statements (including the dialect's
//! upsert conflict clause), generic execute/query entry points, the FTS
//! subdriver, and lifecycle hooks. Trait methods with a defaulted
//! `feature_missing` body are how an adapter declares an operation
//! unsupported.

use ministore_core::{Error, Result};
use ministore_query::{QueryDialect, SqlValue};

/// One result row as dialect-neutral values.
#[derive(Debug, Clone)]
pub struct SqlRow(pub Vec<SqlValue>);

impl SqlRow {
    fn get(&self, idx: usize) -> Result<&SqlValue> {
        self.0
            .get(idx)
            .ok_or_else(|| Error::sql(format!("row has no column {idx}")))
    }

    pub fn i64(&self, idx: usize) -> Result<i64> {
        self.get(idx)?
            .as_i64()
            .ok_or_else(|| Error::sql(format!("column {idx} is not an integer")))
    }

    pub fn opt_i64(&self, idx: usize) -> Result<Option<i64>> {
        let v = self.get(idx)?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(self.i64(idx)?))
    }

    pub fn f64(&self, idx: usize) -> Result<f64> {
        self.get(idx)?
            .as_f64()
            .ok_or_else(|| Error::sql(format!("column {idx} is not numeric")))
    }

    pub fn opt_f64(&self, idx: usize) -> Result<Option<f64>> {
        let v = self.get(idx)?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(self.f64(idx)?))
    }

    pub fn str(&self, idx: usize) -> Result<&str> {
        self.get(idx)?
            .as_str()
            .ok_or_else(|| Error::sql(format!("column {idx} is not text")))
    }
}

/// Parameterized SQL for every single-row operation, in the adapter's
/// placeholder spelling.
pub struct SqlTemplates {
    /// `(path, data_json, created_at_ms, updated_at_ms) -> id`. The
    /// conflict clause preserves `created_at_ms` and never decreases
    /// `updated_at_ms`.
    pub upsert_item: &'static str,
    /// `(path) -> id, path, data_json, created_at_ms, updated_at_ms`.
    pub select_item_by_path: &'static str,
    /// `(item_id)`.
    pub delete_item: &'static str,
    /// `() -> id, path, data_json, created_at_ms, updated_at_ms`, id order.
    pub select_all_items: &'static str,

    /// `(item_id) -> value_id`.
    pub select_item_value_ids: &'static str,
    pub delete_postings: &'static str,
    pub delete_present: &'static str,
    pub delete_numbers: &'static str,
    pub delete_dates: &'static str,
    pub delete_bools: &'static str,
    /// `(item_id, field)`.
    pub insert_present: &'static str,
    /// `(item_id, field, value)`.
    pub insert_number: &'static str,
    pub insert_date: &'static str,
    pub insert_bool: &'static str,
    /// `(field, value_id, item_id)`.
    pub insert_posting: &'static str,

    /// `(field, value)`: insert-or-ignore with `doc_freq = 0`.
    pub dict_upsert: &'static str,
    /// `(field, value) -> id`.
    pub dict_select_id: &'static str,
    /// `(value_id)`.
    pub dict_increment: &'static str,
    /// `(value_id)`: clamped at zero.
    pub dict_decrement: &'static str,
    /// Removes zero-reference dictionary rows.
    pub dict_compact: &'static str,

    /// `(handle, payload_json, created_at_ms, expires_at_ms)`.
    pub cursor_insert: &'static str,
    /// `(handle) -> payload_json, expires_at_ms`.
    pub cursor_select: &'static str,
    pub cursor_delete: &'static str,
    /// `(now_ms)`.
    pub cursor_purge: &'static str,

    /// `(key, value)`.
    pub meta_upsert: &'static str,
    /// `(key) -> value`.
    pub meta_select: &'static str,

    /// `(field) -> count`.
    pub count_present: &'static str,
}

/// A concrete storage binding.
///
/// Implementations are `Send` so an index handle can move across
/// threads; the facade serializes access behind a mutex.
pub trait StorageDriver: Send {
    /// The SQL the planner cannot write itself.
    fn dialect(&self) -> &'static dyn QueryDialect;

    /// The single-row statement table.
    fn templates(&self) -> &'static SqlTemplates;

    /// Executes a statement, returning the affected row count.
    fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64>;

    /// Runs a query, materializing every row.
    fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Creates all relational tables and indexes (idempotent).
    fn create_tables(&mut self) -> Result<()>;

    // -- FTS subdriver -------------------------------------------------------

    /// Creates the full-text table for the given text fields. A no-op
    /// when the list is empty.
    fn fts_create(&mut self, text_fields: &[String]) -> Result<()>;

    /// The text fields the full-text table currently covers.
    fn fts_columns(&mut self) -> Result<Vec<String>>;

    /// Evolves the full-text table to cover exactly `text_fields`.
    /// Existing rows must be rewritten by the caller afterwards.
    fn fts_add_columns(&mut self, text_fields: &[String]) -> Result<()>;

    /// Writes the full-text row for one item; `None` columns are null.
    fn fts_upsert(&mut self, item_id: i64, cols: &[(String, Option<String>)]) -> Result<()>;

    /// Drops the full-text row for one item.
    fn fts_delete(&mut self, item_id: i64) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Engine-specific housekeeping. Best-effort at the call site.
    fn optimize(&mut self) -> Result<()> {
        Err(Error::FeatureMissing("optimize".into()))
    }
}

/// Runs `f` inside a transaction, committing on success and rolling back
/// on error. The rollback itself is best-effort.
pub fn with_tx<T>(
    driver: &mut dyn StorageDriver,
    f: impl FnOnce(&mut dyn StorageDriver) -> Result<T>,
) -> Result<T> {
    driver.begin()?;
    match f(driver) {
        Ok(value) => {
            driver.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rb) = driver.rollback() {
                tracing::warn!(error = %rb, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_accessors() {
        let row = SqlRow(vec![
            SqlValue::Int(7),
            SqlValue::Text("x".into()),
            SqlValue::Null,
            SqlValue::Float(1.5),
        ]);
        assert_eq!(row.i64(0).unwrap(), 7);
        assert_eq!(row.str(1).unwrap(), "x");
        assert_eq!(row.opt_i64(2).unwrap(), None);
        assert_eq!(row.opt_f64(3).unwrap(), Some(1.5));
        assert!(row.i64(1).is_err());
        assert!(row.str(9).is_err());
    }
}
