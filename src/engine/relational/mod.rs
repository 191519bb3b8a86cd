//! Relational backend
//!
//! Tables in a SQLite database addressed through generated statement text.

pub mod engine;
pub mod host;
pub mod sqlite;
pub mod statement;

pub use engine::RelationalStoreEngine;
pub use host::{SqlHandle, SqliteHost};
pub use statement::{escape_string, TableSchema, WhereClause};
