//! [`PostgresDriver`] -- the synchronous Postgres storage binding.
//!
//! Exercised against a live server by the embedding application; the
//! test environment here has none, so coverage lives in the shared
//! planner/template tests and the dialect unit tests.

use bytes::BytesMut;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, NoTls};
use tracing::info;

use ministore_core::{Error, Result};
use ministore_query::{QueryDialect, SqlValue};

use crate::contract::{SqlRow, SqlTemplates, StorageDriver};
use crate::postgres::ddl;
use crate::postgres::dialect::{self, fts_column};

/// Postgres storage driver over a single client connection.
pub struct PostgresDriver {
    client: Client,
}

impl PostgresDriver {
    /// Connects with a libpq-style parameter string, e.g.
    /// `host=localhost user=app dbname=index`.
    pub fn connect(params: &str) -> Result<Self> {
        info!("connecting to Postgres");
        let client = Client::connect(params, NoTls)
            .map_err(|e| Error::sql(format!("failed to connect: {e}")))?;
        Ok(Self { client })
    }

    fn params<'a>(args: &'a [SqlValue]) -> Vec<Bind<'a>> {
        args.iter().map(Bind).collect()
    }
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver").finish_non_exhaustive()
    }
}

/// Adapts [`SqlValue`] to postgres binding.
#[derive(Debug)]
struct Bind<'a>(&'a SqlValue);

impl ToSql for Bind<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Int(v) => v.to_sql(ty, out),
            SqlValue::Float(v) => v.to_sql(ty, out),
            SqlValue::Text(s) => s.as_str().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The statement shapes keep value and column types aligned.
        true
    }

    to_sql_checked!();
}

fn scan_row(row: &postgres::Row) -> Result<SqlRow> {
    let mut values = Vec::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        let ty = col.type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)
                .map_err(Error::sql)?
                .map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)
                .map_err(Error::sql)?
                .map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)
                .map_err(Error::sql)?
                .map(SqlValue::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)
                .map_err(Error::sql)?
                .map(|v| SqlValue::Float(v as f64))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)
                .map_err(Error::sql)?
                .map(SqlValue::Float)
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)
                .map_err(Error::sql)?
                .map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            row.try_get::<_, Option<String>>(i)
                .map_err(Error::sql)?
                .map(SqlValue::Text)
        } else {
            return Err(Error::sql(format!(
                "unsupported column type {ty} at index {i}"
            )));
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(SqlRow(values))
}

impl StorageDriver for PostgresDriver {
    fn dialect(&self) -> &'static dyn QueryDialect {
        &dialect::DIALECT
    }

    fn templates(&self) -> &'static SqlTemplates {
        &ddl::TEMPLATES
    }

    fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        let binds = Self::params(args);
        let refs: Vec<&(dyn ToSql + Sync)> =
            binds.iter().map(|b| b as &(dyn ToSql + Sync)).collect();
        self.client.execute(sql, &refs).map_err(Error::sql)
    }

    fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let binds = Self::params(args);
        let refs: Vec<&(dyn ToSql + Sync)> =
            binds.iter().map(|b| b as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(sql, &refs).map_err(Error::sql)?;
        rows.iter().map(scan_row).collect()
    }

    fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").map_err(Error::sql)
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").map_err(Error::sql)
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").map_err(Error::sql)
    }

    fn create_tables(&mut self) -> Result<()> {
        for stmt in ddl::SCHEMA_STATEMENTS {
            self.client.batch_execute(stmt).map_err(Error::sql)?;
        }
        Ok(())
    }

    fn fts_create(&mut self, text_fields: &[String]) -> Result<()> {
        if text_fields.is_empty() {
            return Ok(());
        }
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS search (item_id BIGINT PRIMARY KEY)",
            )
            .map_err(Error::sql)?;
        self.fts_add_columns(text_fields)
    }

    fn fts_columns(&mut self) -> Result<Vec<String>> {
        let rows = self.query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_name = 'search' AND column_name LIKE 'fts\\_%' ESCAPE '\\' \
             ORDER BY column_name",
            &[],
        )?;
        rows.iter()
            .map(|r| Ok(r.str(0)?.trim_start_matches("fts_").to_string()))
            .collect()
    }

    fn fts_add_columns(&mut self, text_fields: &[String]) -> Result<()> {
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS search (item_id BIGINT PRIMARY KEY)",
            )
            .map_err(Error::sql)?;
        for field in text_fields {
            let col = fts_column(field);
            self.client
                .batch_execute(&format!(
                    "ALTER TABLE search ADD COLUMN IF NOT EXISTS \"{col}\" TSVECTOR"
                ))
                .map_err(Error::sql)?;
            self.client
                .batch_execute(&format!(
                    "CREATE INDEX IF NOT EXISTS idx_search_{col} \
                     ON search USING GIN (\"{col}\")"
                ))
                .map_err(Error::sql)?;
        }
        Ok(())
    }

    fn fts_upsert(&mut self, item_id: i64, cols: &[(String, Option<String>)]) -> Result<()> {
        if cols.is_empty() {
            return Ok(());
        }
        let mut names = Vec::with_capacity(cols.len());
        let mut exprs = Vec::with_capacity(cols.len());
        let mut sets = Vec::with_capacity(cols.len());
        for (i, (field, _)) in cols.iter().enumerate() {
            let col = fts_column(field);
            exprs.push(format!("to_tsvector('simple', ${})", i + 2));
            sets.push(format!("\"{col}\" = EXCLUDED.\"{col}\""));
            names.push(format!("\"{col}\""));
        }
        let sql = format!(
            "INSERT INTO search (item_id, {}) VALUES ($1, {}) \
             ON CONFLICT (item_id) DO UPDATE SET {}",
            names.join(", "),
            exprs.join(", "),
            sets.join(", ")
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
        self.execute(
            "DELETE FROM search WHERE item_id = $1",
            &[SqlValue::Int(item_id)],
        )?;
        Ok(())
    }

    fn optimize(&mut self) -> Result<()> {
        self.execute(ddl::TEMPLATES.dict_compact, &[])?;
        self.client.batch_execute("ANALYZE").map_err(Error::sql)
    }
}
