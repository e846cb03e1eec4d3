//! Search execution and output shaping.
//!
//! One search call: best-effort purge of expired short cursors, parse /
//! normalize / plan / assemble, execute with `limit+1` to detect further
//! pages, shape documents per the `show` selector, and mint the next
//! cursor from the last row of the page.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use ministore_core::{Cancel, CursorMode, Error, IndexOptions, Result, Schema};
use ministore_query::cursor::{self, CursorPayload};
use ministore_query::normalize::{normalize, Limits};
use ministore_query::{parser, plan::Planner, rank, Rank};

use crate::contract::StorageDriver;
use crate::cursors;

/// Default page size when the request does not set one.
pub const DEFAULT_LIMIT: usize = 20;

/// Which parts of each stored document a page carries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Show {
    /// Only `{path}`.
    None,
    /// The verbatim stored document.
    #[default]
    All,
    /// `path` plus the named top-level keys.
    Fields(Vec<String>),
}

impl Show {
    /// Parses the external spelling: `none`, `all`, or `f1,f2,...`.
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => Self::None,
            "all" | "" => Self::All,
            list => Self::Fields(
                list.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }
}

/// One search call.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub rank: Rank,
    pub limit: usize,
    pub cursor: Option<String>,
    pub show: Show,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            rank: Rank::Default,
            limit: DEFAULT_LIMIT,
            cursor: None,
            show: Show::All,
        }
    }

    pub fn rank(mut self, rank: Rank) -> Self {
        self.rank = rank;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn show(mut self, show: Show) -> Self {
        self.show = show;
        self
    }
}

/// One page of ranked results.
#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub items: Vec<Value>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub explain_steps: Vec<String>,
    pub explain_query: String,
}

/// Executes a search against an open driver.
pub fn search(
    driver: &mut dyn StorageDriver,
    schema: &Schema,
    opts: &IndexOptions,
    req: &SearchRequest,
    cancel: &Cancel,
) -> Result<SearchPage> {
    cancel.check()?;
    let now_ms = opts.now_ms();

    // Inline, best-effort cleanup of expired short cursors.
    if opts.cursor_mode == CursorMode::Short {
        if let Err(e) = cursors::purge(driver, now_ms) {
            warn!(error = %e, "expired cursor purge failed");
        }
    }

    let expr = parser::parse(&req.query)?;
    normalize(&expr, &Limits::from(opts))?;

    let hash = cursor::query_hash(&schema.to_canonical_json(), &req.query, &req.rank);
    let after = match &req.cursor {
        None => None,
        Some(token) => {
            let payload = cursors::resolve(driver, token, now_ms)?;
            cursor::verify_hash(&payload, &hash)?;
            Some(payload)
        }
    };

    let limit = if req.limit == 0 { DEFAULT_LIMIT } else { req.limit };
    let dialect = driver.dialect();
    let planner = Planner::new(schema, dialect, opts.max_prefix_expansion, now_ms);
    let plan = planner.compile(&expr)?;
    let assembled = rank::assemble(plan, &req.rank, schema, dialect, limit, after.as_ref())?;

    cancel.check()?;
    let mut rows = driver.query(&assembled.sql, &assembled.values)?;
    debug!(query = %req.query, rows = rows.len(), "search executed");

    let has_more = rows.len() > limit;
    rows.truncate(limit);

    let next_cursor = if has_more {
        let last = rows.last().expect("non-empty page when has_more");
        let payload = CursorPayload {
            kind: assembled.kind,
            score: last.opt_f64(5)?,
            item_id: last.i64(0)?,
            updated_at_ms: last.i64(4)?,
            path: last.str(1)?.to_string(),
            field: assembled.field.clone(),
            hash,
        };
        Some(match opts.cursor_mode {
            CursorMode::Full => cursor::encode_full(&payload),
            CursorMode::Short => cursors::store(driver, &payload, opts.cursor_ttl, now_ms)?,
        })
    } else {
        None
    };

    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        cancel.check()?;
        items.push(shape(row.str(1)?, row.str(2)?, &req.show)?);
    }

    Ok(SearchPage {
        items,
        has_more,
        next_cursor,
        explain_steps: assembled.explain,
        explain_query: assembled.sql,
    })
}

/// Shapes one stored document per the `show` selector. The `path` key
/// is always present in the output.
fn shape(path: &str, data_json: &str, show: &Show) -> Result<Value> {
    match show {
        Show::None => Ok(json!({ "path": path })),
        Show::All => {
            let mut doc = parse_stored(data_json)?;
            doc.entry("path")
                .or_insert_with(|| Value::String(path.to_string()));
            Ok(Value::Object(doc))
        }
        Show::Fields(fields) => {
            let doc = parse_stored(data_json)?;
            let mut out = Map::new();
            out.insert("path".to_string(), Value::String(path.to_string()));
            for field in fields {
                if let Some(value) = doc.get(field) {
                    out.insert(field.clone(), value.clone());
                }
            }
            Ok(Value::Object(out))
        }
    }
}

fn parse_stored(data_json: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(data_json) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(Error::sql("stored document is not a JSON object")),
    }
}
