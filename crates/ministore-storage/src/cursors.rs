//! Short-cursor persistence.
//!
//! Short mode hides ordering values from clients: the payload lives in
//! the `cursor_store` table under a random handle and expires after the
//! configured TTL. Full tokens resolve without touching storage.

use std::time::Duration;

use rand::RngCore;
use tracing::debug;

use ministore_core::{Error, Result};
use ministore_query::cursor::{self, CursorPayload};
use ministore_query::SqlValue;

use crate::contract::StorageDriver;

/// Persists a payload and returns the `c:<handle>` token.
pub fn store(
    driver: &mut dyn StorageDriver,
    payload: &CursorPayload,
    ttl: Duration,
    now_ms: i64,
) -> Result<String> {
    let mut handle_bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut handle_bytes);
    let handle = cursor::hex(&handle_bytes);
    let json = serde_json::to_string(payload)
        .map_err(|e| Error::cursor(format!("payload serialization failed: {e}")))?;
    let expires = now_ms + ttl.as_millis() as i64;
    driver.execute(
        driver.templates().cursor_insert,
        &[
            SqlValue::Text(handle.clone()),
            SqlValue::Text(json),
            SqlValue::Int(now_ms),
            SqlValue::Int(expires),
        ],
    )?;
    Ok(cursor::short_token(&handle))
}

/// Resolves either carrier back into a payload.
///
/// Expired short cursors are rejected (and dropped best-effort); a
/// resumed search never silently restarts from the first page.
pub fn resolve(
    driver: &mut dyn StorageDriver,
    token: &str,
    now_ms: i64,
) -> Result<CursorPayload> {
    if !cursor::is_short(token) {
        return cursor::decode_full(token);
    }
    let handle = cursor::short_handle(token)?;
    let rows = driver.query(
        driver.templates().cursor_select,
        &[SqlValue::Text(handle.to_string())],
    )?;
    let row = rows
        .first()
        .ok_or_else(|| Error::cursor("unknown or expired cursor"))?;
    let payload_json = row.str(0)?.to_string();
    let expires_at_ms = row.i64(1)?;
    if expires_at_ms < now_ms {
        if let Err(e) = driver.execute(
            driver.templates().cursor_delete,
            &[SqlValue::Text(handle.to_string())],
        ) {
            debug!(error = %e, "failed to drop expired cursor");
        }
        return Err(Error::cursor("cursor expired"));
    }
    serde_json::from_str(&payload_json)
        .map_err(|_| Error::cursor("malformed stored cursor payload"))
}

/// Drops every expired cursor row. Best-effort at call sites.
pub fn purge(driver: &mut dyn StorageDriver, now_ms: i64) -> Result<u64> {
    driver.execute(driver.templates().cursor_purge, &[SqlValue::Int(now_ms)])
}
