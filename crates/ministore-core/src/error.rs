//! Error taxonomy for the ministore crates.
//!
//! The `Display` output of every variant is the user-visible failure
//! string; each starts with a canonical kind prefix (`schema:`,
//! `query_parse:`, `unknown_field:`, ...) so callers can match on the
//! kind without inspecting the enum.

/// Errors surfaced by the index and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid schema document, field name, reserved name, or a field
    /// value that cannot be coerced during a put.
    #[error("schema: {0}")]
    Schema(String),

    /// Lexical or syntactic error in the query text.
    #[error("query_parse: {0}")]
    QueryParse(String),

    /// The normalizer refused the query (no positive anchor, or a
    /// guardrail violation).
    #[error("query_rejected: {0}")]
    QueryRejected(String),

    /// A predicate names a field absent from the schema.
    #[error("unknown_field: field={0}")]
    UnknownField(String),

    /// A predicate's type is incompatible with the schema field type.
    #[error("type_mismatch: field={field} {detail}")]
    TypeMismatch {
        /// The offending field.
        field: String,
        /// What was expected versus found.
        detail: String,
    },

    /// `Get`/`Peek` on a path that does not exist.
    #[error("not_found: {0}")]
    NotFound(String),

    /// Malformed cursor token, expired short cursor, or query-hash
    /// mismatch on resume.
    #[error("cursor: {0}")]
    Cursor(String),

    /// A failure reported by the backing SQL engine.
    #[error("sql: {0}")]
    Sql(String),

    /// An I/O failure outside the SQL engine (also carries cancellation).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The adapter declared this operation unsupported.
    #[error("feature_missing: {0}")]
    FeatureMissing(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`Error::Schema`] with the given message.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Creates a [`Error::QueryParse`] with the given message.
    pub fn query_parse(message: impl Into<String>) -> Self {
        Self::QueryParse(message.into())
    }

    /// Creates a [`Error::QueryRejected`] with the given message.
    pub fn query_rejected(message: impl Into<String>) -> Self {
        Self::QueryRejected(message.into())
    }

    /// Creates a [`Error::TypeMismatch`] for the given field.
    pub fn type_mismatch(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Creates a [`Error::Cursor`] with the given message.
    pub fn cursor(message: impl Into<String>) -> Self {
        Self::Cursor(message.into())
    }

    /// Wraps a driver-level failure as [`Error::Sql`].
    pub fn sql(err: impl std::fmt::Display) -> Self {
        Self::Sql(err.to_string())
    }

    // -- Predicates ----------------------------------------------------------

    /// The canonical kind tag, i.e. the prefix of the `Display` output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema(_) => "schema",
            Self::QueryParse(_) => "query_parse",
            Self::QueryRejected(_) => "query_rejected",
            Self::UnknownField(_) => "unknown_field",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::NotFound(_) => "not_found",
            Self::Cursor(_) => "cursor",
            Self::Sql(_) => "sql",
            Self::Io(_) => "io",
            Self::FeatureMissing(_) => "feature_missing",
        }
    }

    /// Returns `true` if this is a [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a [`Error::Cursor`].
    pub fn is_cursor(&self) -> bool {
        matches!(self, Self::Cursor(_))
    }
}
