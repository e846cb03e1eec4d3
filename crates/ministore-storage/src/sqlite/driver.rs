//! [`SqliteDriver`] -- the rusqlite storage binding.

use std::path::Path;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::Connection;
use tracing::{debug, info};

use ministore_core::{Error, Result};
use ministore_query::{QueryDialect, SqlValue};

use crate::contract::{SqlRow, SqlTemplates, StorageDriver};
use crate::sqlite::ddl;
use crate::sqlite::dialect;

/// SQLite storage driver over a single connection.
pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    /// Opens (or creates) a database file.
    ///
    /// Enables WAL, foreign keys, a busy timeout, and case-sensitive
    /// LIKE (keyword and path matching are case-sensitive).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");
        let conn = Connection::open(path)
            .map_err(|e| Error::sql(format!("failed to open {}: {e}", path.display())))?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    /// Opens an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::sql(format!("failed to open in-memory db: {e}")))?;
        Self::configure(&conn)?;
        Ok(Self { conn })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA case_sensitive_like = ON;",
        )
        .map_err(|e| Error::sql(format!("failed to set pragmas: {e}")))
    }

    fn quoted_columns(text_fields: &[String]) -> String {
        text_fields
            .iter()
            .map(|f| format!("\"{f}\""))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver").finish_non_exhaustive()
    }
}

/// Adapts [`SqlValue`] to rusqlite binding.
struct Bind<'a>(&'a SqlValue);

impl rusqlite::ToSql for Bind<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn scan_value(value: ValueRef<'_>) -> Result<SqlValue> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Int(v),
        ValueRef::Real(v) => SqlValue::Float(v),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => return Err(Error::sql("unexpected blob column")),
    })
}

impl StorageDriver for SqliteDriver {
    fn dialect(&self) -> &'static dyn QueryDialect {
        &dialect::DIALECT
    }

    fn templates(&self) -> &'static SqlTemplates {
        &ddl::TEMPLATES
    }

    fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(Error::sql)?;
        let n = stmt
            .execute(rusqlite::params_from_iter(args.iter().map(Bind)))
            .map_err(Error::sql)?;
        Ok(n as u64)
    }

    fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(Error::sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(args.iter().map(Bind)))
            .map_err(Error::sql)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(Error::sql)? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(scan_value(row.get_ref(i).map_err(Error::sql)?)?);
            }
            out.push(SqlRow(values));
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(Error::sql)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(Error::sql)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(Error::sql)
    }

    fn create_tables(&mut self) -> Result<()> {
        for stmt in ddl::SCHEMA_STATEMENTS {
            self.conn.execute_batch(stmt).map_err(Error::sql)?;
        }
        Ok(())
    }

    fn fts_create(&mut self, text_fields: &[String]) -> Result<()> {
        if text_fields.is_empty() {
            return Ok(());
        }
        let cols = Self::quoted_columns(text_fields);
        self.conn
            .execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS search USING fts5({cols})"
            ))
            .map_err(Error::sql)
    }

    fn fts_columns(&mut self) -> Result<Vec<String>> {
        let rows = self.query(
            "SELECT name FROM pragma_table_info('search') ORDER BY cid",
            &[],
        )?;
        rows.iter().map(|r| Ok(r.str(0)?.to_string())).collect()
    }

    fn fts_add_columns(&mut self, text_fields: &[String]) -> Result<()> {
        // FTS5 tables cannot grow columns in place; rebuild and let the
        // caller reindex from the stored documents.
        self.conn
            .execute_batch("DROP TABLE IF EXISTS search")
            .map_err(Error::sql)?;
        self.fts_create(text_fields)
    }

    fn fts_upsert(&mut self, item_id: i64, cols: &[(String, Option<String>)]) -> Result<()> {
        if cols.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = cols.iter().map(|(n, _)| format!("\"{n}\"")).collect();
        let placeholders = vec!["?"; cols.len() + 1].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO search (rowid, {}) VALUES ({placeholders})",
            names.join(", ")
        );
        let mut args = vec![SqlValue::Int(item_id)];
        for (_, text) in cols {
            args.push(match text {
                Some(t) => SqlValue::Text(t.clone()),
                None => SqlValue::Null,
            });
        }
        self.execute(&sql, &args)?;
        Ok(())
    }

    fn fts_delete(&mut self, item_id: i64) -> Result<()> {
        self.execute("DELETE FROM search WHERE rowid = ?", &[SqlValue::Int(item_id)])?;
        Ok(())
    }

    fn optimize(&mut self) -> Result<()> {
        self.execute(ddl::TEMPLATES.dict_compact, &[])?;
        if !self.fts_columns()?.is_empty() {
            self.conn
                .execute_batch("INSERT INTO search(search) VALUES('optimize')")
                .map_err(Error::sql)?;
        }
        self.conn
            .execute_batch("PRAGMA optimize")
            .map_err(Error::sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn driver() -> SqliteDriver {
        let mut d = SqliteDriver::open_in_memory().unwrap();
        d.create_tables().unwrap();
        d
    }

    #[test]
    fn create_tables_idempotent() {
        let mut d = driver();
        d.create_tables().unwrap();
    }

    #[test]
    fn execute_and_query_round_trip() {
        let mut d = driver();
        d.execute(
            d.templates().meta_upsert,
            &[
                SqlValue::Text("k".into()),
                SqlValue::Text("v".into()),
            ],
        )
        .unwrap();
        let rows = d
            .query(d.templates().meta_select, &[SqlValue::Text("k".into())])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str(0).unwrap(), "v");
    }

    #[test]
    fn upsert_item_preserves_created_at() {
        let mut d = driver();
        let rows = d
            .query(
                d.templates().upsert_item,
                &[
                    SqlValue::Text("/a".into()),
                    SqlValue::Text("{}".into()),
                    SqlValue::Int(100),
                    SqlValue::Int(100),
                ],
            )
            .unwrap();
        let id = rows[0].i64(0).unwrap();

        let rows = d
            .query(
                d.templates().upsert_item,
                &[
                    SqlValue::Text("/a".into()),
                    SqlValue::Text(r#"{"x":1}"#.into()),
                    SqlValue::Int(200),
                    SqlValue::Int(200),
                ],
            )
            .unwrap();
        assert_eq!(rows[0].i64(0).unwrap(), id, "same item on conflict");

        let rows = d
            .query(
                d.templates().select_item_by_path,
                &[SqlValue::Text("/a".into())],
            )
            .unwrap();
        assert_eq!(rows[0].i64(3).unwrap(), 100, "created preserved");
        assert_eq!(rows[0].i64(4).unwrap(), 200, "updated advanced");
        assert_eq!(rows[0].str(2).unwrap(), r#"{"x":1}"#);
    }

    #[test]
    fn upsert_item_never_decreases_updated() {
        let mut d = driver();
        for ts in [500, 300] {
            d.query(
                d.templates().upsert_item,
                &[
                    SqlValue::Text("/a".into()),
                    SqlValue::Text("{}".into()),
                    SqlValue::Int(ts),
                    SqlValue::Int(ts),
                ],
            )
            .unwrap();
        }
        let rows = d
            .query(
                d.templates().select_item_by_path,
                &[SqlValue::Text("/a".into())],
            )
            .unwrap();
        assert_eq!(rows[0].i64(4).unwrap(), 500);
    }

    #[test]
    fn transactions_roll_back() {
        let mut d = driver();
        d.begin().unwrap();
        d.execute(
            d.templates().meta_upsert,
            &[SqlValue::Text("k".into()), SqlValue::Text("v".into())],
        )
        .unwrap();
        d.rollback().unwrap();
        let rows = d
            .query(d.templates().meta_select, &[SqlValue::Text("k".into())])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn fts_lifecycle() {
        let mut d = driver();
        d.fts_create(&["body".into(), "title".into()]).unwrap();
        assert_eq!(d.fts_columns().unwrap(), vec!["body", "title"]);

        d.fts_upsert(
            1,
            &[
                ("body".into(), Some("hello world".into())),
                ("title".into(), None),
            ],
        )
        .unwrap();
        let rows = d
            .query(
                "SELECT rowid FROM search WHERE search MATCH ?",
                &[SqlValue::Text("hello".into())],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].i64(0).unwrap(), 1);

        d.fts_delete(1).unwrap();
        let rows = d
            .query(
                "SELECT rowid FROM search WHERE search MATCH ?",
                &[SqlValue::Text("hello".into())],
            )
            .unwrap();
        assert!(rows.is_empty());

        // Growing the column set rebuilds the table.
        d.fts_add_columns(&["body".into(), "notes".into(), "title".into()])
            .unwrap();
        assert_eq!(d.fts_columns().unwrap(), vec!["body", "notes", "title"]);
    }

    #[test]
    fn fts_columns_empty_without_table() {
        let mut d = driver();
        assert!(d.fts_columns().unwrap().is_empty());
    }

    #[test]
    fn like_is_case_sensitive() {
        let mut d = driver();
        d.query(
            d.templates().upsert_item,
            &[
                SqlValue::Text("/A".into()),
                SqlValue::Text("{}".into()),
                SqlValue::Int(1),
                SqlValue::Int(1),
            ],
        )
        .unwrap();
        let rows = d
            .query(
                "SELECT id FROM items WHERE path LIKE ? ESCAPE '\\'",
                &[SqlValue::Text("/a%".into())],
            )
            .unwrap();
        assert!(rows.is_empty(), "LIKE must be case-sensitive");
    }

    #[test]
    fn optimize_supported() {
        let mut d = driver();
        d.fts_create(&["t".into()]).unwrap();
        d.optimize().unwrap();
    }
}
