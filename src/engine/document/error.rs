//! Document store error types

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Requested version {requested} is lower than stored version {current}")]
    VersionError { requested: u32, current: u32 },

    #[error("Invalid version: {0}")]
    InvalidVersion(u32),

    #[error("Object store not found: {0}")]
    StoreNotFound(String),

    #[error("Object store already exists: {0}")]
    StoreAlreadyExists(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Unique index {index} already holds {value}")]
    Constraint { index: String, value: String },

    #[error("Record has no valid key at '{0}' and the store has no key generator")]
    MissingKey(String),

    #[error("Transaction is read-only")]
    ReadOnly,

    #[error("Object store {0} is outside the transaction scope")]
    OutOfScope(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Operation not supported by this document API: {0}")]
    Unsupported(&'static str),

    #[error("Format version {found} not supported (min: {min}, max: {max})")]
    UnsupportedFormatVersion { found: u32, min: u32, max: u32 },

    #[error("Corrupt record file name: {0}")]
    CorruptKey(String),
}

pub type Result<T> = std::result::Result<T, DocError>;
