//! Query language and planner for the ministore document index.
//!
//! Pipeline: query text -> [`token`] lexer -> [`parser`] AST ->
//! [`normalize`] anchor/guardrail checks -> [`plan`] CTE graph ->
//! [`rank`] final SQL assembly. [`cursor`] carries pagination state
//! between pages.

pub mod ast;
pub mod cursor;
pub mod normalize;
pub mod parser;
pub mod plan;
pub mod rank;
pub mod sql;
pub mod token;

pub use ast::{Expr, MatchKind, Predicate};
pub use cursor::CursorPayload;
pub use normalize::Limits;
pub use plan::{Cte, Plan, Planner};
pub use rank::{Assembled, Rank, RankKind};
pub use sql::{ArgList, PlaceholderStyle, QueryDialect, SqlValue, TextPred};
