//! Core types for the ministore document index.
//!
//! This crate holds everything the query and storage layers share: the
//! schema model, document field extraction, the error taxonomy, date
//! parsing, index options, and the cancellation handle.

pub mod cancel;
pub mod document;
pub mod error;
pub mod options;
pub mod schema;
pub mod time;

pub use cancel::Cancel;
pub use error::{Error, Result};
pub use options::{CursorMode, IndexOptions};
pub use schema::{FieldSpec, FieldType, Schema};
