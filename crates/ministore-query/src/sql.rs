//! SQL plumbing shared by the planner and the storage adapters.
//!
//! Bound values never appear in SQL text; every predicate allocates
//! placeholders through [`ArgList`] in source order, so `?` and `$n`
//! dialects produce identical value vectors.

use ministore_core::{Result, Schema};

/// How the dialect spells positional placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (SQLite).
    Question,
    /// `$1`, `$2`, ... (Postgres).
    Dollar,
}

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Placeholder allocator and bind-value collector.
#[derive(Debug, Clone)]
pub struct ArgList {
    style: PlaceholderStyle,
    values: Vec<SqlValue>,
}

impl ArgList {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            values: Vec::new(),
        }
    }

    /// Binds a value and returns the placeholder text to splice into SQL.
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        match self.style {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${}", self.values.len()),
        }
    }

    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Escapes LIKE metacharacters in a literal (`\`, `%`, `_`).
///
/// Patterns built from the result must carry `ESCAPE '\'`.
pub fn like_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Translates a glob pattern (`*`, `?`) into a LIKE pattern.
pub fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// A text predicate collected for ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPred {
    /// Scoping text field, or `None` for match-any-text-field.
    pub field: Option<String>,
    /// The raw query words.
    pub query: String,
}

/// The dialect-specific SQL the planner and final assembly cannot write
/// themselves. Implemented by each storage adapter.
pub trait QueryDialect {
    /// The placeholder spelling for this dialect.
    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Body of a leaf CTE selecting `item_id` for documents matching one
    /// text predicate.
    fn fts_match_sql(
        &self,
        pred: &TextPred,
        schema: &Schema,
        args: &mut ArgList,
    ) -> Result<String>;

    /// Body of the scoring CTE: `(item_id, s)` for every document
    /// matching any of the text predicates, where `s` is the weighted
    /// relevance score (higher is better).
    fn fts_score_sql(
        &self,
        preds: &[TextPred],
        schema: &Schema,
        args: &mut ArgList,
    ) -> Result<String>;

    /// `expr DESC` with nulls ordered last.
    fn order_desc_nulls_last(&self, expr: &str) -> String;
}
