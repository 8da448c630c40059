//! Error types for the embedded engine boundary.

use rusqlite::ErrorCode;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur at the embedded SQL engine boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The embedded engine reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An I/O error occurred on the database file set.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file could not be read with the supplied key, or is not a database.
    #[error("invalid password or not a database")]
    InvalidKey,

    /// The password exceeds the supported size.
    #[error("password too long: {len} bytes (max {max})")]
    PasswordTooLong {
        /// Supplied length.
        len: usize,
        /// Maximum length.
        max: usize,
    },

    /// Deriving the raw cipher key failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// A path could not be handed to the engine.
    #[error("invalid database path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    /// Returns the engine's primary result code, if this is an engine error.
    #[must_use]
    pub fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.code),
            _ => None,
        }
    }

    /// Returns true if the engine reported a corrupted or unreadable file.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
        )
    }

    /// Returns true if the engine gave up waiting on a lock.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// Returns true if the engine ran out of memory.
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.sqlite_code(), Some(ErrorCode::OutOfMemory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: i32) -> StorageError {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn classifies_engine_codes() {
        assert!(failure(rusqlite::ffi::SQLITE_CORRUPT).is_corruption());
        assert!(failure(rusqlite::ffi::SQLITE_NOTADB).is_corruption());
        assert!(failure(rusqlite::ffi::SQLITE_BUSY).is_busy());
        assert!(failure(rusqlite::ffi::SQLITE_LOCKED).is_busy());
        assert!(failure(rusqlite::ffi::SQLITE_NOMEM).is_out_of_memory());
        assert!(!failure(rusqlite::ffi::SQLITE_CONSTRAINT).is_corruption());
    }

    #[test]
    fn non_engine_errors_have_no_code() {
        let err = StorageError::InvalidKey;
        assert!(err.sqlite_code().is_none());
        assert!(!err.is_busy());
    }
}
