//! Storage error taxonomy shared by both backends

use thiserror::Error;

use super::document::DocError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Version conflict: requested {requested}, stored {current}")]
    VersionConflict { requested: u32, current: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Could not open database: {0}")]
    Open(String),

    #[error("Could not write data: {0}")]
    Write(String),

    #[error("Could not read data: {0}")]
    Read(String),

    #[error("Could not remove data: {0}")]
    Remove(String),

    #[error("Could not clear store: {0}")]
    Clear(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Could not open cursor: {0}")]
    Cursor(String),

    #[error("Schema probe failed for {table}: {reason}")]
    SchemaProbe { table: String, reason: String },

    #[error("Mutation phase refused: {0}")]
    Blocked(String),

    #[error("Store is not open")]
    NotOpen,

    #[error("Cursor was opened without write access")]
    ReadOnly,

    #[error("No storage backend available")]
    NoBackend,

    #[error("Operation not supported by the {backend} backend: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error(transparent)]
    Document(#[from] DocError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Short category name used when the failure is logged
    pub fn category(&self) -> &'static str {
        match self {
            StoreError::VersionConflict { .. } => "version",
            StoreError::NotFound(_) => "not_found",
            StoreError::Open(_) => "open",
            StoreError::Write(_) => "write",
            StoreError::Read(_) => "read",
            StoreError::Remove(_) => "remove",
            StoreError::Clear(_) => "clear",
            StoreError::Index(_) => "index",
            StoreError::Cursor(_) | StoreError::ReadOnly => "cursor",
            StoreError::SchemaProbe { .. } => "schema_probe",
            StoreError::Blocked(_) => "blocked",
            StoreError::NotOpen => "not_open",
            StoreError::NoBackend | StoreError::Unsupported { .. } => "backend",
            StoreError::Document(_) => "document",
            StoreError::Sqlite(_) | StoreError::Pool(_) => "sqlite",
            StoreError::Io(_) => "io",
            StoreError::Task(_) => "task",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
