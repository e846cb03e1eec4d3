//! Compiles a normalized expression into a CTE graph.
//!
//! Every predicate becomes one leaf CTE selecting a column named
//! `item_id`; `AND`/`OR`/`NOT` combine leaves with INTERSECT/UNION/
//! EXCEPT. The planner validates field references against the schema,
//! reinterprets keyword predicates by field type, and lowers the
//! `created`/`updated` pseudo-fields onto the items table. Output is a
//! plain value so the planner is testable without a database.

use ministore_core::schema::{FieldSpec, FieldType};
use ministore_core::time;
use ministore_core::{Error, Result, Schema};

use crate::ast::{CmpOp, Expr, MatchKind, Predicate};
use crate::sql::{glob_to_like, like_escape, ArgList, QueryDialect, SqlValue, TextPred};

/// One named query fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub sql: String,
}

/// Planner output: the CTE list, the name of the result CTE, bound
/// values in source order, collected text predicates, and explain steps.
#[derive(Debug)]
pub struct Plan {
    pub ctes: Vec<Cte>,
    pub result: String,
    pub args: ArgList,
    pub text_preds: Vec<TextPred>,
    pub explain: Vec<String>,
    pub uses_fts: bool,
}

/// Where a field's values live.
enum FieldRef<'a> {
    Schema(&'a FieldSpec),
    /// `items.created_at_ms`.
    Created,
    /// `items.updated_at_ms`.
    Updated,
}

impl FieldRef<'_> {
    fn items_column(&self) -> Option<&'static str> {
        match self {
            Self::Created => Some("created_at_ms"),
            Self::Updated => Some("updated_at_ms"),
            Self::Schema(_) => None,
        }
    }
}

/// Compiles expressions against one schema/dialect pair.
pub struct Planner<'a> {
    schema: &'a Schema,
    dialect: &'a dyn QueryDialect,
    max_prefix_expansion: usize,
    now_ms: i64,
}

impl<'a> Planner<'a> {
    pub fn new(
        schema: &'a Schema,
        dialect: &'a dyn QueryDialect,
        max_prefix_expansion: usize,
        now_ms: i64,
    ) -> Self {
        Self {
            schema,
            dialect,
            max_prefix_expansion,
            now_ms,
        }
    }

    /// Compiles the expression to a [`Plan`].
    pub fn compile(&self, expr: &Expr) -> Result<Plan> {
        let mut plan = Plan {
            ctes: Vec::new(),
            result: String::new(),
            args: ArgList::new(self.dialect.placeholder_style()),
            text_preds: Vec::new(),
            explain: Vec::new(),
            uses_fts: false,
        };
        let result = self.compile_expr(expr, &mut plan)?;
        plan.result = result;
        Ok(plan)
    }

    fn push_cte(&self, plan: &mut Plan, sql: String, step: &str) -> String {
        let name = format!("q{}", plan.ctes.len());
        plan.explain.push(format!("{name} = {step}"));
        plan.ctes.push(Cte { name: name.clone(), sql });
        name
    }

    fn compile_expr(&self, expr: &Expr, plan: &mut Plan) -> Result<String> {
        match expr {
            Expr::And(l, r) => {
                let a = self.compile_expr(l, plan)?;
                let b = self.compile_expr(r, plan)?;
                let sql = format!(
                    "SELECT item_id FROM {a} INTERSECT SELECT item_id FROM {b}"
                );
                Ok(self.push_cte(plan, sql, &format!("and({a}, {b})")))
            }
            Expr::Or(l, r) => {
                let a = self.compile_expr(l, plan)?;
                let b = self.compile_expr(r, plan)?;
                let sql = format!(
                    "SELECT item_id FROM {a} UNION SELECT item_id FROM {b}"
                );
                Ok(self.push_cte(plan, sql, &format!("or({a}, {b})")))
            }
            Expr::Not(inner) => {
                let a = self.compile_expr(inner, plan)?;
                let sql = format!(
                    "SELECT id AS item_id FROM items EXCEPT SELECT item_id FROM {a}"
                );
                Ok(self.push_cte(plan, sql, &format!("not({a})")))
            }
            Expr::Pred(p) => self.compile_pred(p, plan),
        }
    }

    /// Looks a field up in the schema, admitting the pseudo-fields.
    fn resolve(&self, field: &str) -> Result<FieldRef<'a>> {
        match field {
            "created" => Ok(FieldRef::Created),
            "updated" => Ok(FieldRef::Updated),
            _ => self
                .schema
                .field(field)
                .map(FieldRef::Schema)
                .ok_or_else(|| Error::UnknownField(field.to_string())),
        }
    }

    fn compile_pred(&self, pred: &Predicate, plan: &mut Plan) -> Result<String> {
        match pred {
            Predicate::Has { field } => {
                match self.resolve(field)? {
                    FieldRef::Schema(_) => {}
                    _ => {
                        return Err(Error::type_mismatch(
                            field,
                            "has: is not applicable to created/updated",
                        ));
                    }
                }
                let ph = plan.args.push(SqlValue::Text(field.clone()));
                let sql =
                    format!("SELECT item_id FROM field_present WHERE field = {ph}");
                Ok(self.push_cte(plan, sql, &format!("has({field})")))
            }

            Predicate::PathGlob { pattern } => {
                let like = if matches!(
                    crate::ast::classify_pattern(pattern),
                    MatchKind::Prefix
                ) {
                    let lit = pattern.trim_end_matches('*');
                    format!("{}%", like_escape(lit))
                } else {
                    glob_to_like(pattern)
                };
                let ph = plan.args.push(SqlValue::Text(like));
                let sql = format!(
                    "SELECT id AS item_id FROM items WHERE path LIKE {ph} ESCAPE '\\'"
                );
                Ok(self.push_cte(plan, sql, &format!("path({pattern})")))
            }

            Predicate::Keyword {
                field,
                pattern,
                kind,
            } => self.compile_keyword(field, pattern, *kind, plan),

            Predicate::Text { field, query } => self.compile_text(
                TextPred {
                    field: field.clone(),
                    query: query.clone(),
                },
                plan,
            ),

            Predicate::NumberCmp { field, op, value } => {
                let target = self.resolve(field)?;
                if let Some(col) = target.items_column() {
                    let at_ms = epoch_ms_literal(field, *value)?;
                    let ph = plan.args.push(SqlValue::Int(at_ms));
                    let sql = format!(
                        "SELECT id AS item_id FROM items WHERE {col} {} {ph}",
                        op.as_sql()
                    );
                    return Ok(self.push_cte(
                        plan,
                        sql,
                        &format!("cmp({field} {} {value})", op.as_sql()),
                    ));
                }
                let table = self.numeric_table(field, &target)?;
                let fph = plan.args.push(SqlValue::Text(field.clone()));
                let vph = plan.args.push(SqlValue::Float(*value));
                let sql = format!(
                    "SELECT DISTINCT item_id FROM {table} WHERE field = {fph} AND value {} {vph}",
                    op.as_sql()
                );
                Ok(self.push_cte(
                    plan,
                    sql,
                    &format!("cmp({field} {} {value})", op.as_sql()),
                ))
            }

            Predicate::NumberRange { field, lo, hi } => {
                let target = self.resolve(field)?;
                if let Some(col) = target.items_column() {
                    let lo_ms = epoch_ms_literal(field, *lo)?;
                    let hi_ms = epoch_ms_literal(field, *hi)?;
                    let lo_ph = plan.args.push(SqlValue::Int(lo_ms));
                    let hi_ph = plan.args.push(SqlValue::Int(hi_ms));
                    let sql = format!(
                        "SELECT id AS item_id FROM items WHERE {col} >= {lo_ph} AND {col} <= {hi_ph}"
                    );
                    return Ok(self.push_cte(
                        plan,
                        sql,
                        &format!("range({field} {lo}..{hi})"),
                    ));
                }
                let table = self.numeric_table(field, &target)?;
                let fph = plan.args.push(SqlValue::Text(field.clone()));
                let lo_ph = plan.args.push(SqlValue::Float(*lo));
                let hi_ph = plan.args.push(SqlValue::Float(*hi));
                let sql = format!(
                    "SELECT DISTINCT item_id FROM {table} WHERE field = {fph} AND value >= {lo_ph} AND value <= {hi_ph}"
                );
                Ok(self.push_cte(plan, sql, &format!("range({field} {lo}..{hi})")))
            }

            Predicate::DateCmpAbs { field, op, at_ms } => {
                self.compile_date_cmp(field, *op, *at_ms, plan)
            }

            Predicate::DateRangeAbs {
                field,
                lo_ms,
                hi_ms,
            } => {
                let target = self.resolve(field)?;
                if let Some(col) = target.items_column() {
                    let lo_ph = plan.args.push(SqlValue::Int(*lo_ms));
                    let hi_ph = plan.args.push(SqlValue::Int(*hi_ms));
                    let sql = format!(
                        "SELECT id AS item_id FROM items WHERE {col} >= {lo_ph} AND {col} <= {hi_ph}"
                    );
                    return Ok(self.push_cte(
                        plan,
                        sql,
                        &format!("date_range({field})"),
                    ));
                }
                self.require_date(field, &target)?;
                let fph = plan.args.push(SqlValue::Text(field.clone()));
                let lo_ph = plan.args.push(SqlValue::Int(*lo_ms));
                let hi_ph = plan.args.push(SqlValue::Int(*hi_ms));
                let sql = format!(
                    "SELECT DISTINCT item_id FROM field_date WHERE field = {fph} AND value >= {lo_ph} AND value <= {hi_ph}"
                );
                Ok(self.push_cte(plan, sql, &format!("date_range({field})")))
            }

            Predicate::DateCmpRel {
                field,
                op,
                amount,
                unit,
            } => {
                let target = self.resolve(field)?;
                let rel = time::relative_ms(*amount, *unit);
                // created/updated compare ages from now, so the target is
                // in the past and the operator mirrors; schema date fields
                // compare against a future target with the operator kept.
                let (at_ms, op) = if target.items_column().is_some() {
                    (self.now_ms - rel, op.mirrored())
                } else {
                    (self.now_ms + rel, *op)
                };
                self.compile_date_cmp(field, op, at_ms, plan)
            }

            Predicate::Bool { field, value } => {
                match self.resolve(field)? {
                    FieldRef::Schema(spec) if spec.field_type == FieldType::Bool => {}
                    FieldRef::Schema(spec) => {
                        return Err(Error::type_mismatch(
                            field,
                            format!("expected bool, schema declares {}", spec.field_type),
                        ));
                    }
                    _ => {
                        return Err(Error::type_mismatch(
                            field,
                            "created/updated are not boolean",
                        ));
                    }
                }
                let fph = plan.args.push(SqlValue::Text(field.clone()));
                let vph = plan.args.push(SqlValue::Int(i64::from(*value)));
                let sql = format!(
                    "SELECT item_id FROM field_bool WHERE field = {fph} AND value = {vph}"
                );
                Ok(self.push_cte(plan, sql, &format!("bool({field}={value})")))
            }
        }
    }

    /// The sidecar table a numeric comparison targets.
    fn numeric_table(&self, field: &str, target: &FieldRef<'_>) -> Result<&'static str> {
        match target {
            FieldRef::Schema(spec) => match spec.field_type {
                FieldType::Number => Ok("field_number"),
                // Dates are epoch-ms integers; numeric comparison is allowed.
                FieldType::Date => Ok("field_date"),
                other => Err(Error::type_mismatch(
                    field,
                    format!("expected number or date, schema declares {other}"),
                )),
            },
            _ => unreachable!("items columns handled by caller"),
        }
    }

    fn require_date(&self, field: &str, target: &FieldRef<'_>) -> Result<()> {
        match target {
            FieldRef::Schema(spec) if spec.field_type == FieldType::Date => Ok(()),
            FieldRef::Schema(spec) => Err(Error::type_mismatch(
                field,
                format!("expected date, schema declares {}", spec.field_type),
            )),
            _ => Ok(()),
        }
    }

    fn compile_date_cmp(
        &self,
        field: &str,
        op: CmpOp,
        at_ms: i64,
        plan: &mut Plan,
    ) -> Result<String> {
        let target = self.resolve(field)?;
        if let Some(col) = target.items_column() {
            let ph = plan.args.push(SqlValue::Int(at_ms));
            let sql = format!(
                "SELECT id AS item_id FROM items WHERE {col} {} {ph}",
                op.as_sql()
            );
            return Ok(self.push_cte(
                plan,
                sql,
                &format!("date_cmp({field} {} {at_ms})", op.as_sql()),
            ));
        }
        self.require_date(field, &target)?;
        let fph = plan.args.push(SqlValue::Text(field.to_string()));
        let vph = plan.args.push(SqlValue::Int(at_ms));
        let sql = format!(
            "SELECT DISTINCT item_id FROM field_date WHERE field = {fph} AND value {} {vph}",
            op.as_sql()
        );
        Ok(self.push_cte(
            plan,
            sql,
            &format!("date_cmp({field} {} {at_ms})", op.as_sql()),
        ))
    }

    /// Keyword predicates consult the schema type before lowering.
    fn compile_keyword(
        &self,
        field: &str,
        pattern: &str,
        kind: MatchKind,
        plan: &mut Plan,
    ) -> Result<String> {
        let spec = match self.resolve(field)? {
            FieldRef::Schema(spec) => spec,
            _ => {
                return Err(Error::type_mismatch(
                    field,
                    "created/updated accept only date comparisons",
                ));
            }
        };

        match spec.field_type {
            FieldType::Text => {
                // Wildcards are dictionary syntax; the FTS engine gets words.
                let words: String =
                    pattern.chars().filter(|c| !matches!(c, '*' | '?')).collect();
                if words.trim().is_empty() {
                    return Err(Error::type_mismatch(
                        field,
                        "text match needs at least one word",
                    ));
                }
                return self.compile_text(
                    TextPred {
                        field: Some(field.to_string()),
                        query: words,
                    },
                    plan,
                );
            }
            FieldType::Bool => {
                let value = match pattern {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(Error::type_mismatch(
                            field,
                            format!("expected true or false, found {pattern:?}"),
                        ));
                    }
                };
                return self.compile_pred(
                    &Predicate::Bool {
                        field: field.to_string(),
                        value,
                    },
                    plan,
                );
            }
            FieldType::Date => {
                if kind != MatchKind::Exact {
                    return Err(Error::type_mismatch(
                        field,
                        "date fields accept no wildcard patterns",
                    ));
                }
                let at_ms = time::parse_date_ms(pattern).ok_or_else(|| {
                    Error::type_mismatch(
                        field,
                        format!("cannot parse {pattern:?} as a date"),
                    )
                })?;
                return self.compile_date_cmp(field, CmpOp::Eq, at_ms, plan);
            }
            FieldType::Number => {
                if kind != MatchKind::Exact {
                    return Err(Error::type_mismatch(
                        field,
                        "number fields accept no wildcard patterns",
                    ));
                }
                let value: f64 = pattern.parse().map_err(|_| {
                    Error::type_mismatch(
                        field,
                        format!("cannot parse {pattern:?} as a number"),
                    )
                })?;
                return self.compile_pred(
                    &Predicate::NumberCmp {
                        field: field.to_string(),
                        op: CmpOp::Eq,
                        value,
                    },
                    plan,
                );
            }
            FieldType::Keyword => {}
        }

        match kind {
            MatchKind::Exact => {
                let fph = plan.args.push(SqlValue::Text(field.to_string()));
                let vph = plan.args.push(SqlValue::Text(pattern.to_string()));
                let sql = format!(
                    "SELECT p.item_id FROM kw_postings p \
                     JOIN kw_dict d ON d.id = p.value_id \
                     WHERE d.field = {fph} AND d.value = {vph}"
                );
                Ok(self.push_cte(plan, sql, &format!("keyword({field} = {pattern})")))
            }
            MatchKind::Prefix | MatchKind::Contains | MatchKind::Glob => {
                let like = match kind {
                    MatchKind::Prefix => {
                        format!("{}%", like_escape(pattern.trim_end_matches('*')))
                    }
                    MatchKind::Contains => {
                        format!("%{}%", like_escape(pattern.trim_matches('*')))
                    }
                    _ => glob_to_like(pattern),
                };
                let fph = plan.args.push(SqlValue::Text(field.to_string()));
                let vph = plan.args.push(SqlValue::Text(like));
                let sql = format!(
                    "SELECT DISTINCT p.item_id FROM kw_postings p WHERE p.value_id IN (\
                     SELECT id FROM kw_dict WHERE field = {fph} AND value LIKE {vph} ESCAPE '\\' \
                     ORDER BY id LIMIT {})",
                    self.max_prefix_expansion
                );
                Ok(self.push_cte(
                    plan,
                    sql,
                    &format!("keyword({field} ~ {pattern})"),
                ))
            }
        }
    }

    fn compile_text(&self, pred: TextPred, plan: &mut Plan) -> Result<String> {
        if !self.schema.has_text_fields() {
            return Err(Error::type_mismatch(
                pred.field.as_deref().unwrap_or("_text"),
                "schema declares no text fields",
            ));
        }
        if let Some(field) = &pred.field {
            match self.schema.field(field) {
                None => return Err(Error::UnknownField(field.clone())),
                Some(spec) if spec.field_type != FieldType::Text => {
                    return Err(Error::type_mismatch(
                        field,
                        format!("expected text, schema declares {}", spec.field_type),
                    ));
                }
                Some(_) => {}
            }
        }
        let sql = self
            .dialect
            .fts_match_sql(&pred, self.schema, &mut plan.args)?;
        plan.uses_fts = true;
        let step = match &pred.field {
            Some(f) => format!("text({f}: {})", pred.query),
            None => format!("text({})", pred.query),
        };
        plan.text_preds.push(pred);
        Ok(self.push_cte(plan, sql, &step))
    }
}

/// Number literals compared against `created`/`updated` are epoch-ms
/// timestamps; a fractional millisecond count is a malformed query, not
/// something to truncate silently.
fn epoch_ms_literal(field: &str, value: f64) -> Result<i64> {
    if value.fract() != 0.0 {
        return Err(Error::type_mismatch(
            field,
            format!("created/updated take integral epoch-ms (got {value})"),
        ));
    }
    Ok(value as i64)
}
