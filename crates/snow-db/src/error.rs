//! Database error types.

use thiserror::Error;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLite error (open, prepare, step, ...)
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Referenced record is missing
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A unique constraint rejected the write
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// A stored value could not be decoded into its domain type
    #[error("corrupt {column} value '{value}'")]
    Corrupt { column: &'static str, value: String },

    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}
