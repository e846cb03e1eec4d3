//! Expression and predicate tree for the query language.

use ministore_core::time::RelUnit;

/// Comparison operators for number and date predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// Mirrors the operator around its argument, for age-from-now
    /// comparisons on the `created`/`updated` pseudo-fields.
    pub fn mirrored(&self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
        }
    }
}

/// How a keyword pattern matches dictionary values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
    Contains,
    Glob,
}

/// A single predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `has:FIELD`: the document carries the field.
    Has { field: String },
    /// `path:PATTERN`: glob over document paths.
    PathGlob { pattern: String },
    /// `FIELD:PATTERN`: keyword match, classified by wildcard shape.
    Keyword {
        field: String,
        pattern: String,
        kind: MatchKind,
    },
    /// Full-text search, optionally scoped to one text field.
    Text { field: Option<String>, query: String },
    /// `FIELD op N`.
    NumberCmp { field: String, op: CmpOp, value: f64 },
    /// `FIELD:lo..hi`, inclusive.
    NumberRange { field: String, lo: f64, hi: f64 },
    /// `FIELD op DATE`.
    DateCmpAbs { field: String, op: CmpOp, at_ms: i64 },
    /// `FIELD:lo..hi` over date literals, inclusive.
    DateRangeAbs { field: String, lo_ms: i64, hi_ms: i64 },
    /// `FIELD op <n><unit>`: resolved against `now` at plan time.
    DateCmpRel {
        field: String,
        op: CmpOp,
        amount: f64,
        unit: RelUnit,
    },
    /// `FIELD:true|false` (or the `!FIELD` sugar).
    Bool { field: String, value: bool },
}

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Pred(Predicate),
}

impl Expr {
    /// Convenience constructor for a predicate leaf.
    pub fn pred(p: Predicate) -> Self {
        Self::Pred(p)
    }
}

/// Classifies a literal pattern by its wildcard shape.
///
/// - no `*` and no `?` -> Exact
/// - contains `?` -> Glob
/// - exactly one trailing `*` -> Prefix
/// - leading and trailing `*`, no others -> Contains
/// - anything else -> Glob
pub fn classify_pattern(pattern: &str) -> MatchKind {
    let stars = pattern.matches('*').count();
    let has_question = pattern.contains('?');
    if stars == 0 && !has_question {
        return MatchKind::Exact;
    }
    if has_question {
        return MatchKind::Glob;
    }
    if stars == 1 && pattern.ends_with('*') {
        return MatchKind::Prefix;
    }
    if stars == 2 && pattern.starts_with('*') && pattern.ends_with('*') && pattern.len() >= 2 {
        return MatchKind::Contains;
    }
    MatchKind::Glob
}
