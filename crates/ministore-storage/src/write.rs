//! Transactional write path.
//!
//! Callers wrap these helpers in a transaction ([`crate::contract::with_tx`]).
//! Dictionary reference counts are maintained as running counters:
//! deltas are applied against the snapshot of the item's previous
//! value-ids rather than recomputed by aggregate.

use std::collections::HashSet;

use tracing::debug;

use ministore_core::document::PreparedDoc;
use ministore_core::{Error, Result, Schema};
use ministore_query::SqlValue;

use crate::contract::StorageDriver;

/// Upserts one prepared document and rewrites all of its index rows.
/// Returns the item id.
pub fn put_tx(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    doc: &PreparedDoc,
    now_ms: i64,
) -> Result<i64> {
    let t = driver.templates();
    let rows = driver.query(
        t.upsert_item,
        &[
            SqlValue::Text(doc.path.clone()),
            SqlValue::Text(doc.raw_json.clone()),
            SqlValue::Int(now_ms),
            SqlValue::Int(now_ms),
        ],
    )?;
    let item_id = rows
        .first()
        .ok_or_else(|| Error::sql("upsert returned no id"))?
        .i64(0)?;
    debug!(path = %doc.path, item_id, "put");
    write_sidecars(driver, schema, item_id, doc)?;
    Ok(item_id)
}

/// Rewrites every sidecar row and the FTS row for one item, applying
/// dictionary refcount deltas against the previous posting snapshot.
/// Does not touch the items row, so reindexing preserves timestamps.
pub fn write_sidecars(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    item_id: i64,
    doc: &PreparedDoc,
) -> Result<()> {
    let t = driver.templates();
    let id_arg = [SqlValue::Int(item_id)];

    // Snapshot the previous keyword value-ids.
    let old_ids: HashSet<i64> = driver
        .query(t.select_item_value_ids, &id_arg)?
        .iter()
        .map(|r| r.i64(0))
        .collect::<Result<_>>()?;

    // Drop the old rows.
    driver.execute(t.delete_postings, &id_arg)?;
    driver.execute(t.delete_present, &id_arg)?;
    driver.execute(t.delete_numbers, &id_arg)?;
    driver.execute(t.delete_dates, &id_arg)?;
    driver.execute(t.delete_bools, &id_arg)?;
    if schema.has_text_fields() {
        driver.fts_delete(item_id)?;
    }

    // Presence rows.
    for field in &doc.present {
        driver.execute(
            t.insert_present,
            &[SqlValue::Int(item_id), SqlValue::Text(field.clone())],
        )?;
    }

    // Keyword postings with refcount deltas.
    let mut new_ids = HashSet::new();
    for (field, value) in &doc.keywords {
        let pair = [
            SqlValue::Text(field.clone()),
            SqlValue::Text(value.clone()),
        ];
        driver.execute(t.dict_upsert, &pair)?;
        let rows = driver.query(t.dict_select_id, &pair)?;
        let value_id = rows
            .first()
            .ok_or_else(|| Error::sql("dictionary row vanished"))?
            .i64(0)?;
        driver.execute(
            t.insert_posting,
            &[
                SqlValue::Text(field.clone()),
                SqlValue::Int(value_id),
                SqlValue::Int(item_id),
            ],
        )?;
        new_ids.insert(value_id);
        if !old_ids.contains(&value_id) {
            driver.execute(t.dict_increment, &[SqlValue::Int(value_id)])?;
        }
    }
    for dropped in old_ids.difference(&new_ids) {
        driver.execute(t.dict_decrement, &[SqlValue::Int(*dropped)])?;
    }

    // Typed sidecars.
    for (field, value) in &doc.numbers {
        driver.execute(
            t.insert_number,
            &[
                SqlValue::Int(item_id),
                SqlValue::Text(field.clone()),
                SqlValue::Float(*value),
            ],
        )?;
    }
    for (field, value) in &doc.dates {
        driver.execute(
            t.insert_date,
            &[
                SqlValue::Int(item_id),
                SqlValue::Text(field.clone()),
                SqlValue::Int(*value),
            ],
        )?;
    }
    for (field, value) in &doc.bools {
        driver.execute(
            t.insert_bool,
            &[
                SqlValue::Int(item_id),
                SqlValue::Text(field.clone()),
                SqlValue::Int(i64::from(*value)),
            ],
        )?;
    }

    // Full-text row, one column per text field in sorted order.
    if schema.has_text_fields() {
        let cols: Vec<(String, Option<String>)> = schema
            .text_fields()
            .iter()
            .map(|(name, _)| {
                let text = doc
                    .texts
                    .iter()
                    .find(|(f, _)| f == name)
                    .map(|(_, v)| v.clone());
                (name.to_string(), text)
            })
            .collect();
        driver.fts_upsert(item_id, &cols)?;
    }

    Ok(())
}

/// Deletes one item and cascades to every sidecar row, decrementing the
/// dictionary refcount of each posting.
pub fn delete_item_tx(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    item_id: i64,
) -> Result<()> {
    let t = driver.templates();
    let id_arg = [SqlValue::Int(item_id)];

    let value_ids: Vec<i64> = driver
        .query(t.select_item_value_ids, &id_arg)?
        .iter()
        .map(|r| r.i64(0))
        .collect::<Result<_>>()?;
    for value_id in value_ids {
        driver.execute(t.dict_decrement, &[SqlValue::Int(value_id)])?;
    }

    driver.execute(t.delete_postings, &id_arg)?;
    driver.execute(t.delete_present, &id_arg)?;
    driver.execute(t.delete_numbers, &id_arg)?;
    driver.execute(t.delete_dates, &id_arg)?;
    driver.execute(t.delete_bools, &id_arg)?;
    if schema.has_text_fields() {
        driver.fts_delete(item_id)?;
    }
    driver.execute(t.delete_item, &id_arg)?;
    debug!(item_id, "deleted");
    Ok(())
}
