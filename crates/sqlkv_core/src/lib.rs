//! # sqlkv Core
//!
//! Pooled byte-key/byte-value engine over an embedded, optionally
//! encrypted SQL store.
//!
//! This crate provides:
//! - [`Executor`]: statements on one physical connection
//! - [`Engine`]: a bounded executor pool with an exclusive-access token
//! - [`Database`]: lifecycle, rekey, import and export for one store
//! - [`Connection`]: the client API with implicit and explicit transactions
//! - [`Snapshot`]: point-in-time read views
//! - [`StoreManager`]: one live handle per store in the process
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlkv_core::{Database, StoreProperties};
//!
//! let db = Database::open(StoreProperties::in_memory("example"))?;
//! let conn = db.new_connection()?;
//!
//! conn.put(b"user/1", b"alice")?;
//! conn.put(b"user/2", b"bob")?;
//! assert_eq!(conn.get_entries(b"user/")?.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod config;
mod connection;
mod database;
pub mod dir;
mod engine;
mod error;
mod executor;
mod maintenance;
mod manager;
mod properties;
mod stats;
mod types;

pub use change_feed::{ChangeFeed, ChangedData};
pub use config::{EngineConfig, MAX_READ_EXECUTORS};
pub use connection::{Connection, Snapshot};
pub use database::Database;
pub use engine::{Engine, EnginePermit, EngineState, ExecutorGuard, Permission};
pub use error::{CoreError, CoreResult};
pub use executor::{Executor, TransactType, DATA_TABLE};
pub use manager::StoreManager;
pub use properties::{
    ConflictPolicy, NoSecurityCapability, SecurityCapability, SecurityFlag, SecurityLabel,
    SecurityOption, StoreProperties,
};
pub use stats::{StatsSnapshot, StoreStats};
pub use types::{
    ConnectionId, Entry, Key, ObserverId, SnapshotId, Value, MAX_BATCH_SIZE, MAX_KEY_SIZE,
    MAX_PASSWORD_SIZE, MAX_VALUE_SIZE,
};

pub use sqlkv_storage::{CipherPassword, StorageError};

/// Crate version, as recorded in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
