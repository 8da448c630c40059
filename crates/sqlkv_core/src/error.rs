//! Error types for sqlkv core.

use sqlkv_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in sqlkv core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed key, value, batch or option.
    #[error("invalid arguments: {message}")]
    InvalidArgs {
        /// What was wrong.
        message: String,
    },

    /// The handle is not open.
    #[error("invalid database: {message}")]
    InvalidDb {
        /// Which handle and why.
        message: String,
    },

    /// A point lookup, prefix scan or delete found nothing.
    #[error("not found")]
    NotFound,

    /// A conflicting transaction, snapshot or maintenance operation is in
    /// progress. Retrying later may succeed; the store was not mutated.
    #[error("busy: {reason}")]
    Busy {
        /// What is holding the resource.
        reason: String,
    },

    /// The embedded engine ran out of memory.
    #[error("out of memory")]
    OutOfMemory,

    /// Transaction started twice, or committed/rolled back while idle.
    #[error("invalid transaction state: {message}")]
    TransactState {
        /// Description of the violation.
        message: String,
    },

    /// The store was opened with an incompatible schema.
    #[error("schema mismatch: store has {stored:?}, open requested {requested:?}")]
    SchemaMismatch {
        /// Schema recorded by the live store.
        stored: String,
        /// Schema supplied by the caller.
        requested: String,
    },

    /// Engine error, propagated verbatim.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// I/O error on the store directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The engine detected a corrupted file. Sticky on the executor that
    /// observed it.
    #[error("database corrupted: {source}")]
    Corrupted {
        /// The engine error that revealed the corruption.
        source: StorageError,
    },

    /// The file could not be read with the supplied password.
    #[error("invalid password or corrupted database")]
    InvalidPasswordOrCorrupted,

    /// A write was attempted on a handle without a writer.
    #[error("store is read-only")]
    ReadOnly,

    /// The operation is not available in this mode.
    #[error("not supported: {operation}")]
    NotSupported {
        /// The refused operation.
        operation: String,
    },

    /// A transaction grew past its entry limit.
    #[error("limit exceeded: {message}")]
    MaxLimits {
        /// Which limit.
        message: String,
    },

    /// Another handle holds the store's directory lock.
    #[error("store is locked by another handle")]
    StoreLocked,
}

impl CoreError {
    /// Creates an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    /// Creates an invalid database error.
    pub fn invalid_db(message: impl Into<String>) -> Self {
        Self::InvalidDb {
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(reason: impl Into<String>) -> Self {
        Self::Busy {
            reason: reason.into(),
        }
    }

    /// Creates a transaction state error.
    pub fn transact_state(message: impl Into<String>) -> Self {
        Self::TransactState {
            message: message.into(),
        }
    }

    /// Creates a not supported error.
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Creates a limit error.
    pub fn max_limits(message: impl Into<String>) -> Self {
        Self::MaxLimits {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns true for [`CoreError::Busy`].
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Returns true for [`CoreError::Corrupted`] and
    /// [`CoreError::InvalidPasswordOrCorrupted`].
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. } | Self::InvalidPasswordOrCorrupted
        )
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey => Self::InvalidPasswordOrCorrupted,
            StorageError::PasswordTooLong { len, max } => {
                Self::invalid_args(format!("password too long: {len} bytes (max {max})"))
            }
            StorageError::Io(err) => Self::Io(err),
            err if err.is_busy() => Self::busy(err.to_string()),
            err if err.is_out_of_memory() => Self::OutOfMemory,
            err => Self::Storage(err),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::from(err).into()
    }
}
