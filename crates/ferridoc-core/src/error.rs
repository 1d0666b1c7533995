//! Error types for all FerriDoc operations.
//!
//! Absence is never an error: lookups that find nothing return `None` or a
//! zero count. Storage failures are wrapped without being interpreted, and
//! query/update problems only surface when a handle runs in strict mode.

use std::io;
use thiserror::Error;

/// Top-level error type for FerriDoc operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted JSON in {table}.{column}: {source}")]
    CorruptJson {
        table: String,
        column: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("extension bucket in {table} row {rowid} is not an object")]
    BucketNotObject { table: String, rowid: i64 },

    #[error("storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("connection pool closed")]
    PoolClosed,

    #[error("no idle connection in pool")]
    PoolExhausted,
}

/// Dialect violations. Lenient handles never produce these; strict handles
/// report them instead of silently degrading to a non-match or a no-op.
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("invalid operand for {operator}: {message}")]
    InvalidOperand { operator: String, message: String },

    #[error("type mismatch for '{field}': {message}")]
    TypeMismatch { field: String, message: String },

    #[error("expected a document (JSON object), got {0}")]
    NotADocument(&'static str),
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("collection already declared: {0}")]
    DuplicateCollection(String),

    #[error("field '{field}' declared twice in collection '{collection}'")]
    DuplicateField { collection: String, field: String },

    #[error("collection '{collection}' uses reserved name '{name}'")]
    ReservedName { collection: String, name: String },

    #[error("collection '{0}' has no key field")]
    MissingKey(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Sqlite(e))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Storage(StorageError::Worker(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
