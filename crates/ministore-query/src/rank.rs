//! Ranking modes and final SQL assembly.
//!
//! The score column is exposed in every mode (null under `none`) so the
//! cursor after-filter algebra stays uniform: strictly-less-than on the
//! score with lexicographic tie-breakers per mode.

use serde::{Deserialize, Serialize};

use ministore_core::schema::FieldType;
use ministore_core::{Error, Result, Schema};

use crate::cursor::CursorPayload;
use crate::plan::Plan;
use crate::sql::{QueryDialect, SqlValue};

/// Requested ranking mode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Rank {
    /// Relevance when the query has text predicates, recency otherwise.
    #[default]
    Default,
    /// `updated_at_ms` descending.
    Recency,
    /// Maximum value of a numeric or date field, descending.
    Field(String),
    /// Insertion order; score is null.
    None,
}

impl Rank {
    /// Stable serialization used in the cursor binding hash.
    pub fn serialization(&self) -> String {
        match self {
            Self::Default => "default".into(),
            Self::Recency => "recency".into(),
            Self::Field(f) => format!("field:{f}"),
            Self::None => "none".into(),
        }
    }
}

impl std::str::FromStr for Rank {
    type Err = Error;

    /// Parses the external spelling: `default`, `recency`, `none`, or
    /// `field:NAME`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "recency" => Ok(Self::Recency),
            "none" => Ok(Self::None),
            other => match other.strip_prefix("field:") {
                Some(field) if !field.is_empty() => Ok(Self::Field(field.to_string())),
                _ => Err(Error::query_parse(format!("unknown rank {other:?}"))),
            },
        }
    }
}

/// The resolved ordering a result page was produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankKind {
    Fts,
    Recency,
    Field,
    None,
}

/// Final SQL plus everything the read path needs to page through it.
#[derive(Debug)]
pub struct Assembled {
    /// The complete WITH ... SELECT ... LIMIT statement.
    pub sql: String,
    /// Bound values in placeholder order.
    pub values: Vec<SqlValue>,
    /// The ordering actually in effect.
    pub kind: RankKind,
    /// Rank field, for `RankKind::Field`.
    pub field: Option<String>,
    /// Plan explain steps plus the ranking step.
    pub explain: Vec<String>,
}

/// Assembles the final search statement from a compiled plan.
///
/// `after` is the decoded cursor of the previous page, already verified
/// against the query hash by the caller.
pub fn assemble(
    mut plan: Plan,
    rank: &Rank,
    schema: &Schema,
    dialect: &dyn QueryDialect,
    limit: usize,
    after: Option<&CursorPayload>,
) -> Result<Assembled> {
    let mut explain = std::mem::take(&mut plan.explain);

    // Resolve the effective mode; default silently degrades to recency
    // when there is nothing to score.
    let (kind, rank_field) = match rank {
        Rank::Default => {
            if !plan.text_preds.is_empty() && schema.has_text_fields() {
                explain.push("rank: relevance".into());
                (RankKind::Fts, None)
            } else {
                explain.push("rank: default -> recency (no text predicates)".into());
                (RankKind::Recency, None)
            }
        }
        Rank::Recency => {
            explain.push("rank: recency".into());
            (RankKind::Recency, None)
        }
        Rank::Field(field) => {
            explain.push(format!("rank: field {field}"));
            (RankKind::Field, Some(field.clone()))
        }
        Rank::None => {
            explain.push("rank: none".into());
            (RankKind::None, None)
        }
    };

    // Score expression and the joins feeding it.
    let mut joins = String::new();
    let score_expr = match kind {
        RankKind::Fts => {
            let sql = dialect.fts_score_sql(&plan.text_preds, schema, &mut plan.args)?;
            plan.ctes.push(crate::plan::Cte {
                name: "scores".into(),
                sql,
            });
            joins.push_str(" LEFT JOIN scores ON scores.item_id = i.id");
            "scores.s".to_string()
        }
        RankKind::Recency => "i.updated_at_ms".to_string(),
        RankKind::Field => {
            let field = rank_field.as_deref().expect("field mode carries a field");
            match field {
                "created" => "i.created_at_ms".to_string(),
                "updated" => "i.updated_at_ms".to_string(),
                _ => {
                    let table = match schema.field(field) {
                        None => return Err(Error::UnknownField(field.to_string())),
                        Some(spec) => match spec.field_type {
                            FieldType::Number => "field_number",
                            FieldType::Date => "field_date",
                            other => {
                                return Err(Error::type_mismatch(
                                    field,
                                    format!(
                                        "rank field must be number or date, schema declares {other}"
                                    ),
                                ));
                            }
                        },
                    };
                    let fph = plan.args.push(SqlValue::Text(field.to_string()));
                    plan.ctes.push(crate::plan::Cte {
                        name: "rankvals".into(),
                        sql: format!(
                            "SELECT item_id, MAX(value) AS rv FROM {table} \
                             WHERE field = {fph} GROUP BY item_id"
                        ),
                    });
                    joins.push_str(" LEFT JOIN rankvals ON rankvals.item_id = i.id");
                    "rankvals.rv".to_string()
                }
            }
        }
        RankKind::None => "NULL".to_string(),
    };

    // Resume filter: strictly after the cursor row in this total order.
    let mut after_sql = String::new();
    if let Some(cursor) = after {
        if cursor.kind != kind {
            return Err(Error::cursor("cursor rank does not match query"));
        }
        after_sql = after_filter(kind, cursor, &mut plan.args);
    }

    let order_by = match kind {
        RankKind::Fts => format!(
            "{}, q.id ASC",
            dialect.order_desc_nulls_last("q.score")
        ),
        RankKind::Recency => "q.score DESC, q.path ASC".to_string(),
        RankKind::Field => format!(
            "{}, q.updated_at_ms DESC, q.path ASC",
            dialect.order_desc_nulls_last("q.score")
        ),
        RankKind::None => "q.id ASC".to_string(),
    };

    let ctes: Vec<String> = plan
        .ctes
        .iter()
        .map(|c| format!("{} AS ({})", c.name, c.sql))
        .collect();

    let sql = format!(
        "WITH {ctes} \
         SELECT q.id, q.path, q.data_json, q.created_at_ms, q.updated_at_ms, q.score \
         FROM (SELECT i.*, {score_expr} AS score FROM items i{joins} \
         JOIN {result} r ON r.item_id = i.id) q \
         WHERE 1=1{after_sql} \
         ORDER BY {order_by} \
         LIMIT {probe}",
        ctes = ctes.join(", "),
        result = plan.result,
        probe = limit + 1,
    );

    Ok(Assembled {
        sql,
        values: plan.args.into_values(),
        kind,
        field: rank_field,
        explain,
    })
}

/// Builds the strictly-after predicate for one rank mode.
fn after_filter(
    kind: RankKind,
    cursor: &CursorPayload,
    args: &mut crate::sql::ArgList,
) -> String {
    match kind {
        RankKind::Fts => match cursor.score {
            Some(score) => {
                let s1 = args.push(SqlValue::Float(score));
                let s2 = args.push(SqlValue::Float(score));
                let id = args.push(SqlValue::Int(cursor.item_id));
                format!(
                    " AND (q.score < {s1} OR (q.score = {s2} AND q.id > {id}) \
                     OR q.score IS NULL)"
                )
            }
            None => {
                let id = args.push(SqlValue::Int(cursor.item_id));
                format!(" AND q.score IS NULL AND q.id > {id}")
            }
        },
        RankKind::Recency => {
            let u1 = args.push(SqlValue::Int(cursor.updated_at_ms));
            let u2 = args.push(SqlValue::Int(cursor.updated_at_ms));
            let path = args.push(SqlValue::Text(cursor.path.clone()));
            format!(" AND (q.score < {u1} OR (q.score = {u2} AND q.path > {path}))")
        }
        RankKind::Field => {
            let tail = |args: &mut crate::sql::ArgList| {
                let u1 = args.push(SqlValue::Int(cursor.updated_at_ms));
                let u2 = args.push(SqlValue::Int(cursor.updated_at_ms));
                let path = args.push(SqlValue::Text(cursor.path.clone()));
                format!(
                    "(q.updated_at_ms < {u1} OR (q.updated_at_ms = {u2} AND q.path > {path}))"
                )
            };
            match cursor.score {
                Some(score) => {
                    let s1 = args.push(SqlValue::Float(score));
                    let s2 = args.push(SqlValue::Float(score));
                    let rest = tail(args);
                    format!(
                        " AND (q.score < {s1} OR (q.score = {s2} AND {rest}) \
                         OR q.score IS NULL)"
                    )
                }
                None => {
                    let rest = tail(args);
                    format!(" AND q.score IS NULL AND {rest}")
                }
            }
        }
        RankKind::None => {
            let id = args.push(SqlValue::Int(cursor.item_id));
            format!(" AND q.id > {id}")
        }
    }
}
