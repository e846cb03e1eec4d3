//! DDL statements and the SQL template table for the Postgres dialect.

use crate::contract::SqlTemplates;

/// Core DDL executed by `create_tables` (idempotent).
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id            BIGSERIAL PRIMARY KEY,
        path          TEXT NOT NULL UNIQUE,
        data_json     TEXT NOT NULL,
        created_at_ms BIGINT NOT NULL,
        updated_at_ms BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_items_updated ON items (updated_at_ms)",
    r#"
    CREATE TABLE IF NOT EXISTS field_present (
        item_id BIGINT NOT NULL,
        field   TEXT NOT NULL,
        PRIMARY KEY (item_id, field)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_present_field ON field_present (field)",
    r#"
    CREATE TABLE IF NOT EXISTS kw_dict (
        id       BIGSERIAL PRIMARY KEY,
        field    TEXT NOT NULL,
        value    TEXT NOT NULL,
        doc_freq BIGINT NOT NULL DEFAULT 0,
        UNIQUE (field, value)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dict_freq ON kw_dict (field, doc_freq)",
    r#"
    CREATE TABLE IF NOT EXISTS kw_postings (
        field    TEXT NOT NULL,
        value_id BIGINT NOT NULL,
        item_id  BIGINT NOT NULL,
        PRIMARY KEY (field, value_id, item_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_postings_item ON kw_postings (item_id)",
    "CREATE INDEX IF NOT EXISTS idx_postings_value ON kw_postings (value_id)",
    r#"
    CREATE TABLE IF NOT EXISTS field_number (
        item_id BIGINT NOT NULL,
        field   TEXT NOT NULL,
        value   DOUBLE PRECISION NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_number_field ON field_number (field, value)",
    "CREATE INDEX IF NOT EXISTS idx_number_item ON field_number (item_id)",
    r#"
    CREATE TABLE IF NOT EXISTS field_date (
        item_id BIGINT NOT NULL,
        field   TEXT NOT NULL,
        value   BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_date_field ON field_date (field, value)",
    "CREATE INDEX IF NOT EXISTS idx_date_item ON field_date (item_id)",
    r#"
    CREATE TABLE IF NOT EXISTS field_bool (
        item_id BIGINT NOT NULL,
        field   TEXT NOT NULL,
        value   INTEGER NOT NULL,
        PRIMARY KEY (item_id, field)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bool_field ON field_bool (field, value)",
    r#"
    CREATE TABLE IF NOT EXISTS cursor_store (
        handle        TEXT PRIMARY KEY,
        payload_json  TEXT NOT NULL,
        created_at_ms BIGINT NOT NULL,
        expires_at_ms BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cursor_expiry ON cursor_store (expires_at_ms)",
    r#"
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

/// Single-row statements, `$n` placeholders.
pub static TEMPLATES: SqlTemplates = SqlTemplates {
    upsert_item: "INSERT INTO items (path, data_json, created_at_ms, updated_at_ms) \
                  VALUES ($1, $2, $3, $4) \
                  ON CONFLICT (path) DO UPDATE SET \
                  data_json = EXCLUDED.data_json, \
                  updated_at_ms = GREATEST(items.updated_at_ms, EXCLUDED.updated_at_ms) \
                  RETURNING id",
    select_item_by_path:
        "SELECT id, path, data_json, created_at_ms, updated_at_ms FROM items WHERE path = $1",
    delete_item: "DELETE FROM items WHERE id = $1",
    select_all_items:
        "SELECT id, path, data_json, created_at_ms, updated_at_ms FROM items ORDER BY id",

    select_item_value_ids: "SELECT value_id FROM kw_postings WHERE item_id = $1",
    delete_postings: "DELETE FROM kw_postings WHERE item_id = $1",
    delete_present: "DELETE FROM field_present WHERE item_id = $1",
    delete_numbers: "DELETE FROM field_number WHERE item_id = $1",
    delete_dates: "DELETE FROM field_date WHERE item_id = $1",
    delete_bools: "DELETE FROM field_bool WHERE item_id = $1",
    insert_present: "INSERT INTO field_present (item_id, field) VALUES ($1, $2)",
    insert_number: "INSERT INTO field_number (item_id, field, value) VALUES ($1, $2, $3)",
    insert_date: "INSERT INTO field_date (item_id, field, value) VALUES ($1, $2, $3)",
    insert_bool: "INSERT INTO field_bool (item_id, field, value) VALUES ($1, $2, $3)",
    insert_posting: "INSERT INTO kw_postings (field, value_id, item_id) VALUES ($1, $2, $3)",

    dict_upsert: "INSERT INTO kw_dict (field, value, doc_freq) VALUES ($1, $2, 0) \
                  ON CONFLICT (field, value) DO NOTHING",
    dict_select_id: "SELECT id FROM kw_dict WHERE field = $1 AND value = $2",
    dict_increment: "UPDATE kw_dict SET doc_freq = doc_freq + 1 WHERE id = $1",
    dict_decrement: "UPDATE kw_dict SET doc_freq = GREATEST(doc_freq - 1, 0) WHERE id = $1",
    dict_compact: "DELETE FROM kw_dict WHERE doc_freq <= 0",

    cursor_insert: "INSERT INTO cursor_store (handle, payload_json, created_at_ms, expires_at_ms) \
                    VALUES ($1, $2, $3, $4)",
    cursor_select: "SELECT payload_json, expires_at_ms FROM cursor_store WHERE handle = $1",
    cursor_delete: "DELETE FROM cursor_store WHERE handle = $1",
    cursor_purge: "DELETE FROM cursor_store WHERE expires_at_ms < $1",

    meta_upsert: "INSERT INTO meta (key, value) VALUES ($1, $2) \
                  ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    meta_select: "SELECT value FROM meta WHERE key = $1",

    count_present: "SELECT COUNT(*) FROM field_present WHERE field = $1",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_use_dollar_placeholders() {
        for sql in [
            TEMPLATES.upsert_item,
            TEMPLATES.select_item_by_path,
            TEMPLATES.dict_upsert,
            TEMPLATES.cursor_insert,
            TEMPLATES.meta_upsert,
        ] {
            assert!(sql.contains("$1"), "{sql}");
            assert!(!sql.contains('?'), "{sql}");
        }
    }

    #[test]
    fn decrement_clamps_at_zero() {
        assert!(TEMPLATES.dict_decrement.contains("GREATEST(doc_freq - 1, 0)"));
    }

    #[test]
    fn upsert_preserves_created_and_never_lowers_updated() {
        assert!(TEMPLATES.upsert_item.contains("GREATEST(items.updated_at_ms"));
        assert!(!TEMPLATES.upsert_item.contains("created_at_ms = EXCLUDED"));
    }
}
