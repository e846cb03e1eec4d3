//! [`Index`] -- the public facade binding query, write and read paths
//! to one storage driver.
//!
//! The driver sits behind a `Mutex`, so a handle is safe to share
//! across threads; every operation holds the lock for its whole
//! duration, which also gives each search a consistent snapshot.

use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use ministore_core::document::prepare;
use ministore_core::{Cancel, Error, IndexOptions, Result, Schema};
use ministore_query::normalize::{normalize, Limits};
use ministore_query::plan::Planner;
use ministore_query::{parser, SqlValue};

use crate::contract::{with_tx, StorageDriver};
use crate::discover::{self, FieldInfo, FieldStats, ValueCount};
use crate::read::{self, SearchPage, SearchRequest};
use crate::write;

/// Metadata key for the format magic.
const META_MAGIC: &str = "ministore_magic";
/// Metadata key for the format version.
const META_VERSION: &str = "ministore_version";
/// Metadata key for the persisted schema document.
const META_SCHEMA: &str = "schema_json";

const MAGIC: &str = "ministore";
const VERSION: &str = "1";

/// Item metadata without the document body.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ItemMeta {
    pub id: i64,
    pub path: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// An open document index over one storage driver.
pub struct Index {
    driver: Mutex<Box<dyn StorageDriver>>,
    schema: Schema,
    opts: IndexOptions,
}

impl Index {
    /// Creates a new index: tables, full-text table, and metadata.
    ///
    /// Fails if the backing store already holds an index.
    pub fn create(
        mut driver: Box<dyn StorageDriver>,
        schema: Schema,
        opts: IndexOptions,
    ) -> Result<Self> {
        schema.validate()?;
        driver.create_tables()?;
        if meta_get(driver.as_mut(), META_MAGIC)?.is_some() {
            return Err(Error::schema("store already holds an index"));
        }
        let text_fields = text_field_names(&schema);
        driver.fts_create(&text_fields)?;
        let canonical = schema.to_canonical_json();
        with_tx(driver.as_mut(), |d| {
            meta_set(d, META_MAGIC, MAGIC)?;
            meta_set(d, META_VERSION, VERSION)?;
            meta_set(d, META_SCHEMA, &canonical)
        })?;
        info!(fields = schema.fields.len(), "index created");
        Ok(Self {
            driver: Mutex::new(driver),
            schema,
            opts,
        })
    }

    /// Opens an existing index, loading and verifying its metadata.
    pub fn open(mut driver: Box<dyn StorageDriver>, opts: IndexOptions) -> Result<Self> {
        let magic = meta_get(driver.as_mut(), META_MAGIC)
            .ok()
            .flatten()
            .ok_or_else(|| Error::schema("store does not hold a ministore index"))?;
        if magic != MAGIC {
            return Err(Error::schema(format!("unexpected magic {magic:?}")));
        }
        let version = meta_get(driver.as_mut(), META_VERSION)?
            .ok_or_else(|| Error::schema("index version missing"))?;
        if version != VERSION {
            return Err(Error::schema(format!(
                "unsupported index version {version}"
            )));
        }
        let schema_json = meta_get(driver.as_mut(), META_SCHEMA)?
            .ok_or_else(|| Error::schema("index schema missing"))?;
        let schema = Schema::from_json(&schema_json)?;

        // The full-text column set must match the schema's text fields.
        let expected = text_field_names(&schema);
        let actual = driver.fts_columns()?;
        if expected != actual {
            return Err(Error::schema(format!(
                "full-text columns {actual:?} do not match schema text fields {expected:?}"
            )));
        }
        info!(fields = schema.fields.len(), "index opened");
        Ok(Self {
            driver: Mutex::new(driver),
            schema,
            opts,
        })
    }

    /// Opens the index if the store holds one, creating it otherwise.
    ///
    /// An existing index must have been created with the same schema.
    pub fn open_or_create(
        mut driver: Box<dyn StorageDriver>,
        schema: Schema,
        opts: IndexOptions,
    ) -> Result<Self> {
        driver.create_tables()?;
        if meta_get(driver.as_mut(), META_MAGIC)?.is_none() {
            return Self::create(driver, schema, opts);
        }
        let index = Self::open(driver, opts)?;
        if index.schema.to_canonical_json() != schema.to_canonical_json() {
            return Err(Error::schema(
                "stored schema differs from the requested schema",
            ));
        }
        Ok(index)
    }

    /// The schema this index was opened with.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn StorageDriver>>> {
        self.driver
            .lock()
            .map_err(|e| Error::sql(format!("driver mutex poisoned: {e}")))
    }

    // -- Writes --------------------------------------------------------------

    /// Inserts or rewrites one document.
    pub fn put(&self, json: &str, cancel: &Cancel) -> Result<()> {
        cancel.check()?;
        let doc = prepare(&self.schema, json)?;
        let now = self.opts.now_ms();
        let mut driver = self.lock()?;
        with_tx(driver.as_mut(), |d| {
            write::put_tx(d, &self.schema, &doc, now)
        })?;
        Ok(())
    }

    /// Inserts or rewrites several documents, all-or-nothing.
    pub fn batch(&self, docs: &[&str], cancel: &Cancel) -> Result<()> {
        cancel.check()?;
        let prepared: Vec<_> = docs
            .iter()
            .map(|json| prepare(&self.schema, json))
            .collect::<Result<_>>()?;
        let now = self.opts.now_ms();
        let mut driver = self.lock()?;
        with_tx(driver.as_mut(), |d| {
            for doc in &prepared {
                cancel.check()?;
                write::put_tx(d, &self.schema, doc, now)?;
            }
            Ok(())
        })
    }

    /// Deletes one document by path. Returns whether it existed.
    pub fn delete(&self, path: &str, cancel: &Cancel) -> Result<bool> {
        cancel.check()?;
        let mut driver = self.lock()?;
        with_tx(driver.as_mut(), |d| {
            let rows = d.query(
                d.templates().select_item_by_path,
                &[SqlValue::Text(path.to_string())],
            )?;
            let Some(row) = rows.first() else {
                return Ok(false);
            };
            let item_id = row.i64(0)?;
            write::delete_item_tx(d, &self.schema, item_id)?;
            Ok(true)
        })
    }

    /// Deletes every document matched by a query. Returns the count.
    pub fn delete_where(&self, query: &str, cancel: &Cancel) -> Result<u64> {
        cancel.check()?;
        let expr = parser::parse(query)?;
        normalize(&expr, &Limits::from(&self.opts))?;
        let now = self.opts.now_ms();
        let mut driver = self.lock()?;
        with_tx(driver.as_mut(), |d| {
            let planner =
                Planner::new(&self.schema, d.dialect(), self.opts.max_prefix_expansion, now);
            let plan = planner.compile(&expr)?;
            let ctes: Vec<String> = plan
                .ctes
                .iter()
                .map(|c| format!("{} AS ({})", c.name, c.sql))
                .collect();
            let sql = format!(
                "WITH {} SELECT item_id FROM {}",
                ctes.join(", "),
                plan.result
            );
            let ids: Vec<i64> = d
                .query(&sql, plan.args.values())?
                .iter()
                .map(|r| r.i64(0))
                .collect::<Result<_>>()?;
            for id in &ids {
                cancel.check()?;
                write::delete_item_tx(d, &self.schema, *id)?;
            }
            debug!(query, count = ids.len(), "delete_where");
            Ok(ids.len() as u64)
        })
    }

    // -- Reads ---------------------------------------------------------------

    /// Returns the stored document for a path.
    pub fn get(&self, path: &str, cancel: &Cancel) -> Result<Value> {
        cancel.check()?;
        let mut driver = self.lock()?;
        let sql = driver.templates().select_item_by_path;
        let rows = driver.query(
            sql,
            &[SqlValue::Text(path.to_string())],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let mut doc: serde_json::Map<String, Value> =
            serde_json::from_str(row.str(2)?)
                .map_err(|e| Error::sql(format!("stored document corrupt: {e}")))?;
        doc.entry("path")
            .or_insert_with(|| Value::String(path.to_string()));
        Ok(Value::Object(doc))
    }

    /// Returns item metadata for a path, without the document body.
    pub fn peek(&self, path: &str, cancel: &Cancel) -> Result<ItemMeta> {
        cancel.check()?;
        let mut driver = self.lock()?;
        let sql = driver.templates().select_item_by_path;
        let rows = driver.query(
            sql,
            &[SqlValue::Text(path.to_string())],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(ItemMeta {
            id: row.i64(0)?,
            path: row.str(1)?.to_string(),
            created_at_ms: row.i64(3)?,
            updated_at_ms: row.i64(4)?,
        })
    }

    /// Runs a ranked, cursor-paginated search.
    pub fn search(&self, req: &SearchRequest, cancel: &Cancel) -> Result<SearchPage> {
        let mut driver = self.lock()?;
        read::search(driver.as_mut(), &self.schema, &self.opts, req, cancel)
    }

    /// Counts the documents a query matches, without fetching them.
    pub fn count(&self, query: &str, cancel: &Cancel) -> Result<u64> {
        cancel.check()?;
        let expr = parser::parse(query)?;
        normalize(&expr, &Limits::from(&self.opts))?;
        let now = self.opts.now_ms();
        let mut driver = self.lock()?;
        let planner = Planner::new(
            &self.schema,
            driver.dialect(),
            self.opts.max_prefix_expansion,
            now,
        );
        let plan = planner.compile(&expr)?;
        let ctes: Vec<String> = plan
            .ctes
            .iter()
            .map(|c| format!("{} AS ({})", c.name, c.sql))
            .collect();
        let sql = format!(
            "WITH {} SELECT COUNT(*) FROM {}",
            ctes.join(", "),
            plan.result
        );
        let rows = driver.query(&sql, plan.args.values())?;
        rows.first()
            .ok_or_else(|| Error::sql("count returned no row"))?
            .i64(0)
            .map(|n| n as u64)
    }

    /// Ranks the distinct values of a keyword field.
    pub fn discover_values(
        &self,
        field: &str,
        scope: Option<&str>,
        top: usize,
        cancel: &Cancel,
    ) -> Result<Vec<ValueCount>> {
        let mut driver = self.lock()?;
        discover::discover_values(
            driver.as_mut(),
            &self.schema,
            &self.opts,
            field,
            scope,
            top,
            cancel,
        )
    }

    /// Reports every schema field with counts and samples.
    pub fn discover_fields(&self, cancel: &Cancel) -> Result<Vec<FieldInfo>> {
        let mut driver = self.lock()?;
        discover::discover_fields(driver.as_mut(), &self.schema, &self.opts, cancel)
    }

    /// Aggregate statistics over a numeric or date field.
    pub fn stats(
        &self,
        field: &str,
        scope: Option<&str>,
        cancel: &Cancel,
    ) -> Result<FieldStats> {
        let mut driver = self.lock()?;
        discover::stats(
            driver.as_mut(),
            &self.schema,
            &self.opts,
            field,
            scope,
            cancel,
        )
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Applies an additive schema change and reindexes every stored
    /// document from its verbatim JSON. Item timestamps are untouched.
    pub fn apply_schema_additive(&mut self, new_schema: Schema, cancel: &Cancel) -> Result<()> {
        cancel.check()?;
        self.schema.validate_additive(&new_schema)?;
        if new_schema == self.schema {
            return Ok(());
        }
        let canonical = new_schema.to_canonical_json();
        let new_text = text_field_names(&new_schema);
        let text_changed = new_text != text_field_names(&self.schema);

        {
            let mut driver = self.lock()?;
            with_tx(driver.as_mut(), |d| {
                meta_set(d, META_SCHEMA, &canonical)?;
                if text_changed {
                    d.fts_add_columns(&new_text)?;
                }
                let items = d.query(d.templates().select_all_items, &[])?;
                for row in &items {
                    cancel.check()?;
                    let item_id = row.i64(0)?;
                    let doc = prepare(&new_schema, row.str(2)?)?;
                    write::write_sidecars(d, &new_schema, item_id, &doc)?;
                }
                info!(items = items.len(), "schema change applied, documents reindexed");
                Ok(())
            })?;
        }
        self.schema = new_schema;
        Ok(())
    }

    /// Engine housekeeping: dictionary compaction plus the adapter's
    /// optimize hook. Best-effort; never fails the caller.
    pub fn optimize(&self) -> Result<()> {
        let mut driver = self.lock()?;
        match driver.optimize() {
            Ok(()) => {}
            Err(Error::FeatureMissing(op)) => {
                debug!(op, "adapter does not support optimize");
            }
            Err(e) => warn!(error = %e, "optimize failed"),
        }
        Ok(())
    }

    /// Closes the index, releasing the driver.
    pub fn close(self) -> Result<()> {
        drop(self.driver);
        Ok(())
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("fields", &self.schema.fields.len())
            .finish_non_exhaustive()
    }
}

fn text_field_names(schema: &Schema) -> Vec<String> {
    schema
        .text_fields()
        .iter()
        .map(|(n, _)| n.to_string())
        .collect()
}

fn meta_get(driver: &mut dyn StorageDriver, key: &str) -> Result<Option<String>> {
    let rows = driver.query(
        driver.templates().meta_select,
        &[SqlValue::Text(key.to_string())],
    )?;
    rows.first().map(|r| Ok(r.str(0)?.to_string())).transpose()
}

fn meta_set(driver: &mut dyn StorageDriver, key: &str, value: &str) -> Result<()> {
    driver.execute(
        driver.templates().meta_upsert,
        &[
            SqlValue::Text(key.to_string()),
            SqlValue::Text(value.to_string()),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDriver;
    use ministore_core::schema::{FieldSpec, FieldType};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn schema() -> Schema {
        let mut fields = BTreeMap::new();
        fields.insert("tags".into(), FieldSpec::new(FieldType::Keyword).multi());
        fields.insert("priority".into(), FieldSpec::new(FieldType::Number));
        fields.insert("title".into(), FieldSpec::text(2.0));
        Schema::new(fields).unwrap()
    }

    fn index() -> Index {
        let driver = Box::new(SqliteDriver::open_in_memory().unwrap());
        Index::create(driver, schema(), IndexOptions::default()).unwrap()
    }

    #[test]
    fn create_then_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let idx = Index::create(driver, schema(), IndexOptions::default()).unwrap();
        idx.put(r#"{"path":"/a","tags":["x"]}"#, &Cancel::never())
            .unwrap();
        idx.close().unwrap();

        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let idx = Index::open(driver, IndexOptions::default()).unwrap();
        assert_eq!(idx.schema(), &schema());
        let doc = idx.get("/a", &Cancel::never()).unwrap();
        assert_eq!(doc["tags"][0], "x");
    }

    #[test]
    fn create_twice_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        Index::create(driver, schema(), IndexOptions::default()).unwrap();

        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let err = Index::create(driver, schema(), IndexOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("schema:"), "{err}");
    }

    #[test]
    fn open_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let idx = Index::open_or_create(driver, schema(), IndexOptions::default()).unwrap();
        idx.put(r#"{"path":"/a"}"#, &Cancel::never()).unwrap();
        idx.close().unwrap();

        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let idx = Index::open_or_create(driver, schema(), IndexOptions::default()).unwrap();
        idx.get("/a", &Cancel::never()).unwrap();

        // A different schema is rejected instead of silently adopted.
        let mut other = schema().fields;
        other.insert("extra".into(), FieldSpec::new(FieldType::Bool));
        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let err = Index::open_or_create(
            driver,
            Schema::new(other).unwrap(),
            IndexOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("schema:"), "{err}");
    }

    #[test]
    fn open_empty_store_rejected() {
        let driver = Box::new(SqliteDriver::open_in_memory().unwrap());
        let err = Index::open(driver, IndexOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("schema:"), "{err}");
    }

    #[test]
    fn get_and_peek() {
        let idx = index();
        let cancel = Cancel::never();
        idx.put(r#"{"path":"/a","tags":["x"],"priority":2}"#, &cancel)
            .unwrap();

        let doc = idx.get("/a", &cancel).unwrap();
        assert_eq!(doc["path"], "/a");
        assert_eq!(doc["priority"], 2);

        let meta = idx.peek("/a", &cancel).unwrap();
        assert_eq!(meta.path, "/a");
        assert!(meta.created_at_ms > 0);
        assert_eq!(meta.created_at_ms, meta.updated_at_ms);

        assert!(idx.get("/nope", &cancel).unwrap_err().is_not_found());
        assert!(idx.peek("/nope", &cancel).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_reports_existence() {
        let idx = index();
        let cancel = Cancel::never();
        idx.put(r#"{"path":"/a"}"#, &cancel).unwrap();
        assert!(idx.delete("/a", &cancel).unwrap());
        assert!(!idx.delete("/a", &cancel).unwrap());
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let idx = index();
        let cancel = Cancel::never();
        // Second doc has an invalid value; nothing must land.
        let err = idx
            .batch(
                &[
                    r#"{"path":"/a","tags":["x"]}"#,
                    r#"{"path":"/b","priority":"not a number"}"#,
                ],
                &cancel,
            )
            .unwrap_err();
        assert!(err.to_string().starts_with("schema:"), "{err}");
        assert!(idx.get("/a", &cancel).unwrap_err().is_not_found());

        idx.batch(&[r#"{"path":"/a"}"#, r#"{"path":"/b"}"#], &cancel)
            .unwrap();
        idx.get("/a", &cancel).unwrap();
        idx.get("/b", &cancel).unwrap();
    }

    #[test]
    fn count_matches_without_fetching() {
        let idx = index();
        let cancel = Cancel::never();
        for i in 0..5 {
            idx.put(
                &format!(r#"{{"path":"/{i}","priority":{i}}}"#),
                &cancel,
            )
            .unwrap();
        }
        assert_eq!(idx.count("priority>=2", &cancel).unwrap(), 3);
        assert_eq!(idx.count("priority>100", &cancel).unwrap(), 0);
        assert!(idx.count("NOT tags:x", &cancel).is_err(), "anchor rule applies");
    }

    #[test]
    fn delete_where_counts() {
        let idx = index();
        let cancel = Cancel::never();
        idx.put(r#"{"path":"/1","priority":1}"#, &cancel).unwrap();
        idx.put(r#"{"path":"/2","priority":5}"#, &cancel).unwrap();
        idx.put(r#"{"path":"/3","priority":9}"#, &cancel).unwrap();

        let n = idx.delete_where("priority>4", &cancel).unwrap();
        assert_eq!(n, 2);
        idx.get("/1", &cancel).unwrap();
        assert!(idx.get("/2", &cancel).unwrap_err().is_not_found());

        // Unanchored deletes are refused.
        let err = idx.delete_where("NOT tags:x", &cancel).unwrap_err();
        assert!(err.to_string().starts_with("query_rejected:"), "{err}");
    }

    #[test]
    fn additive_schema_change_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let mut idx = Index::create(driver, schema(), IndexOptions::default()).unwrap();
        let cancel = Cancel::never();

        // "body" exists in the document before the schema knows it.
        idx.put(r#"{"path":"/a","title":"hello","body":"stored text"}"#, &cancel)
            .unwrap();
        let before = idx.peek("/a", &cancel).unwrap();

        let mut fields = schema().fields;
        fields.insert("body".into(), FieldSpec::text(1.0));
        let grown = Schema::new(fields).unwrap();
        idx.apply_schema_additive(grown.clone(), &cancel).unwrap();

        // Timestamps untouched by reindex.
        let after = idx.peek("/a", &cancel).unwrap();
        assert_eq!(before, after);

        // The new text field is searchable, and reopen verifies columns.
        let page = idx
            .search(&SearchRequest::new("body:stored"), &cancel)
            .unwrap();
        assert_eq!(page.items.len(), 1);

        idx.close().unwrap();
        let driver = Box::new(SqliteDriver::open(&path).unwrap());
        let idx = Index::open(driver, IndexOptions::default()).unwrap();
        assert_eq!(idx.schema(), &grown);
    }

    #[test]
    fn shrinking_schema_rejected() {
        let mut idx = index();
        let mut fields = schema().fields;
        fields.remove("tags");
        let shrunk = Schema { fields };
        let err = idx
            .apply_schema_additive(shrunk, &Cancel::never())
            .unwrap_err();
        assert!(err.to_string().starts_with("schema:"), "{err}");
    }

    #[test]
    fn optimize_never_fails() {
        let idx = index();
        idx.put(r#"{"path":"/a","tags":["x"]}"#, &Cancel::never())
            .unwrap();
        idx.optimize().unwrap();
    }

    #[test]
    fn cancelled_operations_abort() {
        let idx = index();
        let fired = Cancel::with_deadline(std::time::Duration::from_secs(0));
        let err = idx.put(r#"{"path":"/a"}"#, &fired).unwrap_err();
        assert!(err.to_string().starts_with("io:"), "{err}");
    }
}
