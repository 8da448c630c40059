//! # sqlkv Storage
//!
//! Boundary to the embedded SQL engine used by sqlkv.
//!
//! This crate is the only place that knows how a physical database is
//! opened, keyed and copied. It does not know about key-value semantics,
//! pooling or transactions; `sqlkv_core` builds those on top.
//!
//! ## Provided operations
//!
//! - [`open_database`] - open one connection with cipher key, busy timeout
//!   and optional WAL journaling
//! - [`export_database`] / [`export_database_file`] - write a re-encrypted
//!   (or plaintext) copy through `sqlcipher_export`
//! - [`get_version`] / [`set_version`] - the `user_version` header field
//! - [`files`] - the main file and its `-wal`/`-shm` sidecars as one unit
//!
//! ## Example
//!
//! ```rust
//! use sqlkv_storage::{open_database, get_version, set_version, OpenDbOptions};
//!
//! let conn = open_database(&OpenDbOptions::memory()).unwrap();
//! set_version(&conn, 3).unwrap();
//! assert_eq!(get_version(&conn).unwrap(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod files;
mod options;
mod password;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use options::{OpenDbOptions, DEFAULT_BUSY_TIMEOUT};
pub use password::{CipherPassword, RAW_KEY_SIZE};
pub use sqlite::{
    check_integrity, checkpoint, export_database, export_database_file, get_version,
    open_database, set_cipher_key, set_version, table_exists, verify_key,
};

/// Re-exported engine connection type.
pub use rusqlite::Connection;
