//! Anti-abuse validation: guardrails and the positive-anchor rule.
//!
//! A query executes only if at least one predicate bounds its result set.
//! `And` needs one anchored side; `Or` needs both (either side alone can
//! produce the result set, so both must be bounded); `Not` never anchors.

use ministore_core::{Error, IndexOptions, Result};

use crate::ast::{Expr, MatchKind, Predicate};

/// Pattern-length guardrail settings.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Minimum literal length for prefix and glob patterns.
    pub min_prefix_len: usize,
    /// Minimum inner length for contains patterns.
    pub min_contains_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_prefix_len: 2,
            min_contains_len: 3,
        }
    }
}

impl From<&IndexOptions> for Limits {
    fn from(opts: &IndexOptions) -> Self {
        Self {
            min_prefix_len: opts.min_prefix_len,
            min_contains_len: opts.min_contains_len,
        }
    }
}

/// Validates guardrails on every predicate, then the anchor rule.
pub fn normalize(expr: &Expr, limits: &Limits) -> Result<()> {
    check_guardrails(expr, limits)?;
    if !is_anchored(expr) {
        return Err(Error::query_rejected("no positive anchor"));
    }
    Ok(())
}

/// The literal characters before the first wildcard.
pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?']) {
        Some(i) => &pattern[..i],
        None => pattern,
    }
}

fn check_guardrails(expr: &Expr, limits: &Limits) -> Result<()> {
    match expr {
        Expr::And(l, r) | Expr::Or(l, r) => {
            check_guardrails(l, limits)?;
            check_guardrails(r, limits)
        }
        Expr::Not(inner) => check_guardrails(inner, limits),
        Expr::Pred(p) => check_predicate(p, limits),
    }
}

fn check_predicate(p: &Predicate, limits: &Limits) -> Result<()> {
    match p {
        Predicate::Keyword {
            field,
            pattern,
            kind,
        } => match kind {
            MatchKind::Exact => Ok(()),
            MatchKind::Prefix => {
                let lit = pattern.trim_end_matches('*');
                if lit.chars().count() < limits.min_prefix_len {
                    return Err(Error::query_rejected(format!(
                        "prefix pattern too short (need {} literal chars) field={field}",
                        limits.min_prefix_len
                    )));
                }
                Ok(())
            }
            MatchKind::Contains => {
                let inner = pattern.trim_matches('*');
                if inner.chars().count() < limits.min_contains_len {
                    return Err(Error::query_rejected(format!(
                        "contains pattern too short (need {} inner chars) field={field}",
                        limits.min_contains_len
                    )));
                }
                Ok(())
            }
            MatchKind::Glob => {
                if literal_prefix(pattern).chars().count() < limits.min_prefix_len {
                    return Err(Error::query_rejected(format!(
                        "glob pattern needs a literal prefix of {} chars field={field}",
                        limits.min_prefix_len
                    )));
                }
                Ok(())
            }
        },
        Predicate::PathGlob { pattern } => {
            if literal_prefix(pattern).is_empty() {
                return Err(Error::query_rejected(
                    "path pattern needs a literal prefix",
                ));
            }
            Ok(())
        }
        Predicate::Text { query, .. } => {
            if query.trim().is_empty() {
                return Err(Error::query_rejected("empty text query"));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// An anchored predicate bounds the result set by something more specific
/// than "all documents". Guardrails run first, so any surviving pattern
/// predicate is anchored.
fn is_anchored(expr: &Expr) -> bool {
    match expr {
        Expr::And(l, r) => is_anchored(l) || is_anchored(r),
        Expr::Or(l, r) => is_anchored(l) && is_anchored(r),
        Expr::Not(_) => false,
        Expr::Pred(p) => match p {
            Predicate::Text { .. }
            | Predicate::Has { .. }
            | Predicate::NumberCmp { .. }
            | Predicate::NumberRange { .. }
            | Predicate::DateCmpAbs { .. }
            | Predicate::DateRangeAbs { .. }
            | Predicate::DateCmpRel { .. }
            | Predicate::Bool { .. }
            | Predicate::Keyword { .. }
            | Predicate::PathGlob { .. } => true,
        },
    }
}
