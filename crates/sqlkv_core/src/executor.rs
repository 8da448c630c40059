//! Statement executor over one physical connection.
//!
//! An [`Executor`] translates the entry-level contract into statements on a
//! single engine connection. It is owned by whoever checked it out of the
//! [`Engine`](crate::engine::Engine) pool and is never shared.
//!
//! Every statement path funnels its engine error through one check: a
//! corruption code raises the executor's sticky `corrupted` flag and comes
//! back as [`CoreError::Corrupted`] carrying the original error. Nothing is
//! repaired here.

use crate::error::{CoreError, CoreResult};
use crate::types::{Entry, Key, Value, MAX_KEY_SIZE};
use rusqlite::{params, Connection, OptionalExtension};
use sqlkv_storage::{self as storage, CipherPassword, OpenDbOptions, StorageError};
use std::path::Path;
use tracing::{debug, warn};

const CREATE_TABLES_SQL: &str = "\
    CREATE TABLE IF NOT EXISTS local_data(key BLOB PRIMARY KEY NOT NULL, value BLOB NOT NULL);\
    CREATE TABLE IF NOT EXISTS meta_data(key BLOB PRIMARY KEY NOT NULL, value BLOB NOT NULL);";
const SELECT_SQL: &str = "SELECT value FROM local_data WHERE key = ?1";
const UPSERT_SQL: &str = "INSERT OR REPLACE INTO local_data(key, value) VALUES (?1, ?2)";
const DELETE_SQL: &str = "DELETE FROM local_data WHERE key = ?1";
const CLEAR_SQL: &str = "DELETE FROM local_data";
const SCAN_SQL: &str =
    "SELECT key, value FROM local_data WHERE key >= ?1 AND key <= ?2 ORDER BY key ASC";
const SELECT_META_SQL: &str = "SELECT value FROM meta_data WHERE key = ?1";
const UPSERT_META_SQL: &str = "INSERT OR REPLACE INTO meta_data(key, value) VALUES (?1, ?2)";
const PIN_SQL: &str = "SELECT count(*) FROM sqlite_master";

/// Name of the table holding entries.
pub const DATA_TABLE: &str = "local_data";

/// Lock behavior of a manual transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactType {
    /// Take locks on first access. Used for reads.
    Deferred,
    /// Take the write lock immediately. Used for writes.
    Immediate,
}

/// Issues statements against one engine connection.
#[derive(Debug)]
pub struct Executor {
    conn: Connection,
    writable: bool,
    memory: bool,
    corrupted: bool,
}

impl Executor {
    /// Opens a physical connection.
    pub(crate) fn open(options: &OpenDbOptions, writable: bool) -> CoreResult<Self> {
        let conn = storage::open_database(options).map_err(classify)?;
        debug!(writable, memory = options.is_memory(), "executor opened");
        Ok(Self {
            conn,
            writable,
            memory: options.is_memory(),
            corrupted: false,
        })
    }

    /// Creates the entry and metadata tables if missing.
    pub(crate) fn create_tables(&mut self) -> CoreResult<()> {
        self.ensure_writable()?;
        let result = self.conn.execute_batch(CREATE_TABLES_SQL);
        self.check(result)
    }

    /// Returns true if this executor may write.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns true if the connection is in-memory.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.memory
    }

    /// Returns true once a statement has reported corruption.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Returns true if no manual transaction is open.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// Point lookup.
    pub fn get(&mut self, key: &[u8]) -> CoreResult<Value> {
        let found = self
            .conn
            .prepare_cached(SELECT_SQL)
            .and_then(|mut stmt| stmt.query_row([key], |row| row.get(0)).optional());
        self.check(found)?.ok_or(CoreError::NotFound)
    }

    /// Insert-or-replace. An empty value is stored as such.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.ensure_writable()?;
        let result = self
            .conn
            .prepare_cached(UPSERT_SQL)
            .and_then(|mut stmt| stmt.execute(params![key, value]));
        self.check(result).map(|_| ())
    }

    /// Removes one key; `NotFound` if nothing was removed.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.ensure_writable()?;
        let result = self
            .conn
            .prepare_cached(DELETE_SQL)
            .and_then(|mut stmt| stmt.execute([key]));
        match self.check(result)? {
            0 => Err(CoreError::NotFound),
            _ => Ok(()),
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.ensure_writable()?;
        let result = self.conn.execute(CLEAR_SQL, []);
        self.check(result).map(|_| ())
    }

    /// Entries whose key starts with `prefix`, keys ascending.
    ///
    /// An empty prefix matches everything. Zero matches is `NotFound`, never
    /// an empty list.
    pub fn get_entries(&mut self, prefix: &[u8]) -> CoreResult<Vec<Entry>> {
        let upper = prefix_upper_bound(prefix);
        let result = self.conn.prepare_cached(SCAN_SQL).and_then(|mut stmt| {
            let rows = stmt.query_map(params![prefix, upper], |row| {
                Ok(Entry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?;
            let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        });
        let entries = self.check(result)?;
        if entries.is_empty() {
            return Err(CoreError::NotFound);
        }
        Ok(entries)
    }

    /// Upserts each entry in order; a later duplicate key wins.
    pub fn put_batch(&mut self, entries: &[Entry]) -> CoreResult<()> {
        self.ensure_writable()?;
        if entries.is_empty() {
            return Err(CoreError::invalid_args("batch is empty"));
        }
        let result = self.conn.prepare_cached(UPSERT_SQL).and_then(|mut stmt| {
            for entry in entries {
                stmt.execute(params![entry.key, entry.value])?;
            }
            Ok(())
        });
        self.check(result)
    }

    /// Removes each key and returns the keys that existed.
    ///
    /// Partially present keys succeed; `NotFound` only if none existed.
    pub fn delete_batch(&mut self, keys: &[Key]) -> CoreResult<Vec<Key>> {
        self.ensure_writable()?;
        let result = self.conn.prepare_cached(DELETE_SQL).and_then(|mut stmt| {
            let mut removed = Vec::new();
            for key in keys {
                if stmt.execute([key])? > 0 {
                    removed.push(key.clone());
                }
            }
            Ok(removed)
        });
        let removed = self.check(result)?;
        if removed.is_empty() {
            return Err(CoreError::NotFound);
        }
        Ok(removed)
    }

    /// Opens a manual transaction.
    pub fn start_transaction(&mut self, kind: TransactType) -> CoreResult<()> {
        if !self.conn.is_autocommit() {
            return Err(CoreError::transact_state("executor already in a transaction"));
        }
        if kind == TransactType::Immediate {
            self.ensure_writable()?;
        }
        let sql = match kind {
            TransactType::Deferred => "BEGIN DEFERRED",
            TransactType::Immediate => "BEGIN IMMEDIATE",
        };
        let result = self.conn.execute_batch(sql);
        self.check(result)
    }

    /// Commits the manual transaction.
    pub fn commit(&mut self) -> CoreResult<()> {
        if self.conn.is_autocommit() {
            return Err(CoreError::transact_state("no transaction to commit"));
        }
        let result = self.conn.execute_batch("COMMIT");
        self.check(result)
    }

    /// Rolls the manual transaction back.
    pub fn rollback(&mut self) -> CoreResult<()> {
        if self.conn.is_autocommit() {
            return Err(CoreError::transact_state("no transaction to roll back"));
        }
        let result = self.conn.execute_batch("ROLLBACK");
        self.check(result)
    }

    /// Reads once so an open deferred transaction pins its view.
    pub(crate) fn pin_read_view(&mut self) -> CoreResult<()> {
        let result = self
            .conn
            .query_row(PIN_SQL, [], |row| row.get::<_, i64>(0));
        self.check(result).map(|_| ())
    }

    /// Returns the stored user version.
    pub fn get_version(&mut self) -> CoreResult<i32> {
        let result = storage::get_version(&self.conn);
        self.check(result)
    }

    /// Stores the user version.
    pub fn set_version(&mut self, version: i32) -> CoreResult<()> {
        self.ensure_writable()?;
        let result = storage::set_version(&self.conn, version);
        self.check(result)
    }

    /// Reads a metadata value.
    pub(crate) fn get_meta(&mut self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let found = self
            .conn
            .prepare_cached(SELECT_META_SQL)
            .and_then(|mut stmt| stmt.query_row([key], |row| row.get(0)).optional());
        self.check(found)
    }

    /// Writes a metadata value.
    pub(crate) fn put_meta(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.ensure_writable()?;
        let result = self
            .conn
            .prepare_cached(UPSERT_META_SQL)
            .and_then(|mut stmt| stmt.execute(params![key, value]));
        self.check(result).map(|_| ())
    }

    /// Runs the engine integrity check; an empty list means healthy.
    pub fn check_integrity(&mut self) -> CoreResult<Vec<String>> {
        let result = storage::check_integrity(&self.conn);
        self.check(result)
    }

    /// Copies the whole database to `target`, encrypted with `password`.
    pub(crate) fn export_to(&mut self, target: &Path, password: &CipherPassword) -> CoreResult<()> {
        let result = storage::export_database(&self.conn, target, password);
        self.check(result)
    }

    /// Folds the write-ahead log into the main file.
    pub(crate) fn checkpoint(&mut self) -> CoreResult<()> {
        if self.memory {
            return Ok(());
        }
        let result = storage::checkpoint(&self.conn);
        self.check(result)
    }

    #[cfg(test)]
    pub(crate) fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(CoreError::ReadOnly)
        }
    }

    fn check<T, E: Into<StorageError>>(&mut self, result: Result<T, E>) -> CoreResult<T> {
        result.map_err(|err| self.fail(err.into()))
    }

    fn fail(&mut self, err: StorageError) -> CoreError {
        if err.is_corruption() && !self.corrupted {
            warn!(error = %err, "executor detected corruption");
            self.corrupted = true;
        }
        classify(err)
    }
}

/// Maps an engine error, keeping corruption distinct from other failures.
fn classify(err: StorageError) -> CoreError {
    if err.is_corruption() {
        CoreError::Corrupted { source: err }
    } else {
        err.into()
    }
}

/// Greatest key that still starts with `prefix`.
fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut upper = Vec::with_capacity(MAX_KEY_SIZE.max(prefix.len()));
    upper.extend_from_slice(prefix);
    upper.resize(MAX_KEY_SIZE.max(prefix.len()), 0xFF);
    upper
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn writer() -> Executor {
        let mut executor = Executor::open(&OpenDbOptions::memory(), true).unwrap();
        executor.create_tables().unwrap();
        executor
    }

    fn keys(entries: &[Entry]) -> Vec<&[u8]> {
        entries.iter().map(|e| e.key.as_slice()).collect()
    }

    #[test]
    fn put_get_overwrite() {
        let mut ex = writer();
        assert!(matches!(ex.get(b"k"), Err(CoreError::NotFound)));

        ex.put(b"k", b"v1").unwrap();
        assert_eq!(ex.get(b"k").unwrap(), b"v1");

        ex.put(b"k", b"").unwrap();
        assert_eq!(ex.get(b"k").unwrap(), b"");
    }

    #[test]
    fn delete_reports_missing_key() {
        let mut ex = writer();
        assert!(matches!(ex.delete(b"k"), Err(CoreError::NotFound)));

        ex.put(b"k", b"v").unwrap();
        ex.delete(b"k").unwrap();
        assert!(matches!(ex.get(b"k"), Err(CoreError::NotFound)));
    }

    #[test]
    fn prefix_scan_contract() {
        let mut ex = writer();
        assert!(matches!(ex.get_entries(b""), Err(CoreError::NotFound)));

        ex.put_batch(&[
            Entry::new(b"b".to_vec(), b"2".to_vec()),
            Entry::new(b"a".to_vec(), b"1".to_vec()),
            Entry::new(b"ab".to_vec(), b"3".to_vec()),
            Entry::new(vec![b'a', 0xFF], b"4".to_vec()),
        ])
        .unwrap();

        let all = ex.get_entries(b"").unwrap();
        assert_eq!(
            keys(&all),
            vec![&b"a"[..], &b"ab"[..], &[b'a', 0xFF][..], &b"b"[..]]
        );

        let a = ex.get_entries(b"a").unwrap();
        assert_eq!(a.len(), 3);
        assert!(matches!(ex.get_entries(b"c"), Err(CoreError::NotFound)));
    }

    #[test]
    fn delete_batch_partial_and_none() {
        let mut ex = writer();
        ex.put(b"k1", b"v").unwrap();

        let removed = ex.delete_batch(&[b"k1".to_vec(), b"k2".to_vec()]).unwrap();
        assert_eq!(removed, vec![b"k1".to_vec()]);

        assert!(matches!(
            ex.delete_batch(&[b"k1".to_vec(), b"k2".to_vec()]),
            Err(CoreError::NotFound)
        ));
    }

    #[test]
    fn clear_removes_everything() {
        let mut ex = writer();
        ex.put(b"a", b"1").unwrap();
        ex.put(b"b", b"2").unwrap();
        ex.clear().unwrap();
        assert!(matches!(ex.get_entries(b""), Err(CoreError::NotFound)));
        // Clearing an empty table is still fine.
        ex.clear().unwrap();
    }

    #[test]
    fn transaction_boundaries() {
        let mut ex = writer();
        assert!(matches!(ex.commit(), Err(CoreError::TransactState { .. })));

        ex.start_transaction(TransactType::Immediate).unwrap();
        assert!(!ex.is_autocommit());
        assert!(matches!(
            ex.start_transaction(TransactType::Deferred),
            Err(CoreError::TransactState { .. })
        ));
        ex.put(b"k", b"v").unwrap();
        ex.rollback().unwrap();
        assert!(ex.is_autocommit());
        assert!(matches!(ex.get(b"k"), Err(CoreError::NotFound)));

        ex.start_transaction(TransactType::Immediate).unwrap();
        ex.put(b"k", b"v").unwrap();
        ex.commit().unwrap();
        assert_eq!(ex.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn version_and_meta() {
        let mut ex = writer();
        assert_eq!(ex.get_version().unwrap(), 0);
        ex.set_version(5).unwrap();
        assert_eq!(ex.get_version().unwrap(), 5);

        assert!(ex.get_meta(b"schema").unwrap().is_none());
        ex.put_meta(b"schema", b"v1").unwrap();
        assert_eq!(ex.get_meta(b"schema").unwrap().unwrap(), b"v1");
        assert!(ex.check_integrity().unwrap().is_empty());
    }

    #[test]
    fn corruption_is_sticky() {
        let mut ex = writer();
        let err = ex.fail(StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        )));
        assert!(matches!(err, CoreError::Corrupted { .. }));
        assert!(ex.is_corrupted());

        // Ordinary failures afterwards do not clear the flag.
        let _ = ex.fail(StorageError::InvalidKey);
        assert!(ex.is_corrupted());
    }

    #[test]
    fn upper_bound_covers_longest_key() {
        let upper = prefix_upper_bound(b"ab");
        assert_eq!(upper.len(), MAX_KEY_SIZE);
        assert_eq!(&upper[..2], b"ab");
        assert!(upper[2..].iter().all(|b| *b == 0xFF));
        assert_eq!(prefix_upper_bound(b"").len(), MAX_KEY_SIZE);
    }

    proptest! {
        #[test]
        fn put_then_get_returns_value(
            key in proptest::collection::vec(any::<u8>(), 1..64),
            value in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut ex = writer();
            ex.put(&key, &value).unwrap();
            prop_assert_eq!(ex.get(&key).unwrap(), value);
        }

        #[test]
        fn prefix_scan_matches_filter(
            keys in proptest::collection::btree_set(
                proptest::collection::vec(0u8..4, 1..5), 1..20),
            prefix in proptest::collection::vec(0u8..4, 0..3),
        ) {
            let mut ex = writer();
            for key in &keys {
                ex.put(key, b"v").unwrap();
            }
            let expected: Vec<Vec<u8>> =
                keys.iter().filter(|k| k.starts_with(&prefix)).cloned().collect();
            match ex.get_entries(&prefix) {
                Ok(entries) => {
                    let got: Vec<Vec<u8>> = entries.into_iter().map(|e| e.key).collect();
                    prop_assert_eq!(got, expected);
                }
                Err(CoreError::NotFound) => prop_assert!(expected.is_empty()),
                Err(err) => prop_assert!(false, "unexpected error: {}", err),
            }
        }
    }
}
