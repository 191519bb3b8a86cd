//! Document backend
//!
//! Object stores of JSON records on disk, versioned through upgrade
//! transactions, with secondary indexes and cursors.

pub mod cursor;
pub mod database;
pub mod engine;
pub mod error;
pub mod host;
pub mod meta;

pub use cursor::{CursorDirection, CursorEntry, DocCursor};
pub use database::{DocDatabase, DocFactory, DocFeatures, OpenOutcome, TxMode, VersionApi, VersionChange};
pub use engine::DocumentStoreEngine;
pub use error::DocError;
pub use host::DocumentHost;
