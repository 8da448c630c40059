//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and common test scenarios.

use sqlkv_core::{CipherPassword, Connection, Database, EngineConfig, StoreProperties};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The open handle.
    pub db: Arc<Database>,
    /// Properties the handle was opened with.
    pub props: StoreProperties,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        let props = StoreProperties::in_memory("test");
        Self {
            db: Database::open(props.clone()).expect("Failed to open in-memory store"),
            props,
            _temp_dir: None,
        }
    }

    /// Creates a new plaintext file-backed test store.
    pub fn file() -> Self {
        Self::with_password(CipherPassword::empty())
    }

    /// Creates a new file-backed store encrypted with `password`.
    pub fn encrypted(password: &str) -> Self {
        Self::with_password(CipherPassword::try_from(password).expect("Invalid test password"))
    }

    /// Creates a new file-backed store with a custom engine configuration.
    pub fn with_engine(engine: EngineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let props = StoreProperties::new(temp_dir.path(), "test")
            .create_dir_by_store_id_only(true)
            .engine(engine);
        Self::open_in(temp_dir, props)
    }

    fn with_password(password: CipherPassword) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let props = StoreProperties::new(temp_dir.path(), "test")
            .create_dir_by_store_id_only(true)
            .password(password);
        Self::open_in(temp_dir, props)
    }

    fn open_in(temp_dir: TempDir, props: StoreProperties) -> Self {
        let db = Database::open(props.clone()).expect("Failed to open file store");
        Self {
            db,
            props,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Opens a fresh connection.
    pub fn connect(&self) -> Connection {
        self.db.new_connection().expect("Failed to open connection")
    }

    /// Closes the handle and opens the same store again.
    ///
    /// Picks up the current password, so this works after a rekey.
    /// Connections from the old handle must be dropped first.
    pub fn reopen(&mut self) {
        let props = self.db.properties();
        self.db.close().expect("Failed to close store");
        self.db = Database::open(props.clone()).expect("Failed to reopen store");
        self.props = props;
    }

    /// Returns the temporary directory holding the store, if file-backed.
    pub fn data_dir(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Returns the store directory, if file-backed.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|_| self.props.store_dir())
    }

    /// Returns a path inside the temporary directory that does not exist yet.
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.data_dir()
            .expect("Scratch paths need a file-backed store")
            .join(name)
    }
}

impl std::ops::Deref for TestStore {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use sqlkv_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|conn| {
///         conn.put(b"k", b"v").unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Connection) -> R,
{
    let store = TestStore::memory();
    let conn = store.connect();
    f(&conn)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Connection, &TestStore) -> R,
{
    let store = TestStore::file();
    let conn = store.connect();
    f(&conn, &store)
}

/// Builds a key of the form `<prefix><index:08>`.
pub fn indexed_key(prefix: &str, index: usize) -> Vec<u8> {
    format!("{prefix}{index:08}").into_bytes()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use sqlkv_core::{Entry, MAX_BATCH_SIZE};

    /// Creates a file-backed store holding `count` entries under `item/`.
    pub fn populated_store(count: usize) -> TestStore {
        let store = TestStore::file();
        fill(&store.connect(), "item/", count);
        store
    }

    /// Writes `count` entries under `prefix` in batches.
    ///
    /// The value of each entry is its key.
    pub fn fill(conn: &Connection, prefix: &str, count: usize) {
        let entries: Vec<Entry> = (0..count)
            .map(|i| {
                let key = indexed_key(prefix, i);
                Entry::new(key.clone(), key)
            })
            .collect();
        for chunk in entries.chunks(MAX_BATCH_SIZE) {
            conn.put_batch(chunk).expect("Failed to put batch");
        }
    }

    /// Creates a standalone encrypted store file holding `entries`.
    ///
    /// Returns the temporary directory and the database file path, suitable
    /// as an import source.
    pub fn exported_file(password: &str, entries: &[Entry]) -> (TempDir, PathBuf) {
        let source = TestStore::encrypted(password);
        if !entries.is_empty() {
            source.connect().put_batch(entries).expect("Failed to fill source");
        }
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let target = temp_dir.path().join("export.db");
        source
            .export(
                &target,
                &CipherPassword::try_from(password).expect("Invalid test password"),
            )
            .expect("Failed to export source");
        (temp_dir, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = TestStore::memory();
        assert!(store.is_memory());
        assert!(store.store_dir().is_none());
    }

    #[test]
    fn test_with_temp_store() {
        let value = with_temp_store(|conn| {
            conn.put(b"k", b"v").unwrap();
            conn.get(b"k").unwrap()
        });
        assert_eq!(value, b"v");
    }

    #[test]
    fn test_populated_scenario() {
        let store = scenarios::populated_store(300);
        let conn = store.connect();
        assert_eq!(conn.get_entries(b"item/").unwrap().len(), 300);
        assert_eq!(conn.get(&indexed_key("item/", 42)).unwrap(), indexed_key("item/", 42));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let mut store = TestStore::encrypted("secret");
        store.connect().put(b"k", b"v").unwrap();
        store.reopen();
        assert_eq!(store.connect().get(b"k").unwrap(), b"v");
    }
}
