//! Storage adapters and the index facade for ministore.
//!
//! [`Index`] binds the query pipeline to a [`contract::StorageDriver`].
//! Two adapters ship: [`sqlite::SqliteDriver`] for local files and
//! in-memory databases, and [`postgres::PostgresDriver`] for server
//! deployments.

pub mod contract;
pub mod cursors;
pub mod discover;
pub mod index;
pub mod postgres;
pub mod read;
pub mod sqlite;
pub mod write;

pub use contract::{SqlRow, SqlTemplates, StorageDriver};
pub use discover::{FieldInfo, FieldSample, FieldStats, ValueCount};
pub use index::{Index, ItemMeta};
pub use postgres::PostgresDriver;
pub use read::{SearchPage, SearchRequest, Show};
pub use sqlite::SqliteDriver;
