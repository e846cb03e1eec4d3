//! Cursor payloads and token carriers.
//!
//! A payload records where the previous page stopped under one total
//! order, plus a hash binding it to the exact schema, query text and
//! rank it was created under. Two carriers exist: full tokens embed the
//! payload (base64url, no padding); short tokens (`c:<hex>`) are handles
//! into the server-side cursor store.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ministore_core::{Error, Result};

use crate::rank::{Rank, RankKind};

/// Prefix distinguishing short-cursor handles from full tokens.
pub const SHORT_PREFIX: &str = "c:";

/// Pagination state carried between pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    /// The ordering the page was produced under.
    pub kind: RankKind,
    /// Score of the last returned item (null under `none`, or when the
    /// item carried no rank value).
    pub score: Option<f64>,
    /// Item id of the last returned item.
    pub item_id: i64,
    /// Its update timestamp (recency/field tie-breaker).
    pub updated_at_ms: i64,
    /// Its path (final tie-breaker).
    pub path: String,
    /// Rank field, for field mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Binding hash over schema, query text and rank.
    pub hash: String,
}

/// SHA-256 binding a cursor to its schema, query text and rank, hex-encoded.
pub fn query_hash(canonical_schema_json: &str, query_text: &str, rank: &Rank) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_schema_json.as_bytes());
    hasher.update(b"\n");
    hasher.update(query_text.as_bytes());
    hasher.update(b"\n");
    hasher.update(rank.serialization().as_bytes());
    hex(&hasher.finalize())
}

/// Encodes a payload as a self-contained token.
pub fn encode_full(payload: &CursorPayload) -> String {
    let json = serde_json::to_string(payload).expect("payload serialization cannot fail");
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

/// Decodes a self-contained token back into a payload.
pub fn decode_full(token: &str) -> Result<CursorPayload> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| Error::cursor("malformed cursor token"))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::cursor("malformed cursor payload"))
}

/// Verifies the payload's binding hash against the current query.
pub fn verify_hash(payload: &CursorPayload, expected_hash: &str) -> Result<()> {
    if payload.hash != expected_hash {
        return Err(Error::cursor(
            "cursor does not match this query or schema",
        ));
    }
    Ok(())
}

/// Is this token a short-cursor handle?
pub fn is_short(token: &str) -> bool {
    token.starts_with(SHORT_PREFIX)
}

/// Renders a short handle as a token.
pub fn short_token(handle: &str) -> String {
    format!("{SHORT_PREFIX}{handle}")
}

/// Extracts the handle from a short token.
pub fn short_handle(token: &str) -> Result<&str> {
    token
        .strip_prefix(SHORT_PREFIX)
        .filter(|h| h.len() == 48 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| Error::cursor("malformed cursor handle"))
}

/// Lowercase hex encoding.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
