//! Cross-crate integration test helpers.
//!
//! Provides a model-checked harness and reusable scenarios that drive
//! the public connection API end to end.

use crate::fixtures::TestStore;
use crate::generators::KvOp;
use sqlkv_core::{Connection, CoreError, Entry, Key};
use std::collections::BTreeMap;

/// A test harness that mirrors every write in an ordered model.
pub struct IntegrationHarness {
    /// The store under test.
    pub store: TestStore,
    /// Connection used for all operations.
    pub conn: Connection,
    model: BTreeMap<Key, Vec<u8>>,
}

impl IntegrationHarness {
    /// Creates a harness over a file-backed store.
    pub fn new() -> Self {
        Self::over(TestStore::file())
    }

    /// Creates a harness over an existing store.
    pub fn over(store: TestStore) -> Self {
        let conn = store.connect();
        Self {
            store,
            conn,
            model: BTreeMap::new(),
        }
    }

    /// Puts an entry and tracks it.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.conn.put(key, value).expect("Failed to put entry");
        self.model.insert(key.to_vec(), value.to_vec());
    }

    /// Deletes a key, checking the store agrees on whether it existed.
    pub fn delete(&mut self, key: &[u8]) {
        let expected = self.model.remove(key).is_some();
        match self.conn.delete(key) {
            Ok(()) => assert!(expected, "delete of missing key {key:?} succeeded"),
            Err(CoreError::NotFound) => assert!(!expected, "delete of {key:?} reported NotFound"),
            Err(err) => panic!("Failed to delete entry: {err}"),
        }
    }

    /// Applies a generated operation to both store and model.
    pub fn apply(&mut self, op: &KvOp) {
        let expect_ok = op.apply_to_model(&mut self.model);
        let result = match op {
            KvOp::Put(key, value) => self.conn.put(key, value),
            KvOp::Delete(key) => self.conn.delete(key),
            KvOp::PutBatch(entries) => self.conn.put_batch(entries),
            KvOp::Clear => self.conn.clear(),
        };
        match result {
            Ok(()) => assert!(expect_ok, "{op:?} succeeded but the model rejected it"),
            Err(CoreError::NotFound) => assert!(!expect_ok, "{op:?} reported NotFound"),
            Err(err) => panic!("{op:?} failed: {err}"),
        }
    }

    /// Verifies every tracked entry and the full prefix scan.
    pub fn verify_all(&self) {
        for (key, expected) in &self.model {
            let actual = self.conn.get(key).expect("Failed to get entry");
            assert_eq!(&actual, expected, "Value mismatch for {key:?}");
        }
        self.verify_prefix(b"");
    }

    /// Verifies a prefix scan against the model, order included.
    pub fn verify_prefix(&self, prefix: &[u8]) {
        let expected: Vec<Entry> = self
            .model
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
            .collect();
        match self.conn.get_entries(prefix) {
            Ok(actual) => assert_eq!(actual, expected, "Scan mismatch for {prefix:?}"),
            Err(CoreError::NotFound) => assert!(expected.is_empty(), "Scan of {prefix:?} empty"),
            Err(err) => panic!("Failed to scan: {err}"),
        }
    }

    /// Returns the count of tracked entries.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction scenarios.
pub mod transaction {
    use super::*;

    /// Writes inside an explicit transaction are visible to the writer
    /// and disappear on rollback.
    pub fn test_rollback_discards(conn: &Connection) {
        conn.put(b"keep", b"1").expect("Failed to put");
        conn.start_transaction().expect("Failed to start");
        conn.put(b"keep", b"2").expect("Failed to put in transaction");
        conn.put(b"drop", b"x").expect("Failed to put in transaction");
        assert_eq!(conn.get(b"keep").expect("Failed to get"), b"2");
        conn.rollback().expect("Failed to roll back");

        assert_eq!(conn.get(b"keep").expect("Failed to get"), b"1");
        assert!(conn.get(b"drop").unwrap_err().is_not_found());
        assert!(!conn.is_transaction_started());
    }

    /// A second start on the same connection is a state error.
    pub fn test_double_start(conn: &Connection) {
        conn.start_transaction().expect("Failed to start");
        assert!(matches!(
            conn.start_transaction(),
            Err(CoreError::TransactState { .. })
        ));
        conn.commit().expect("Failed to commit");
        assert!(matches!(conn.commit(), Err(CoreError::TransactState { .. })));
        assert!(matches!(conn.rollback(), Err(CoreError::TransactState { .. })));
    }

    /// Readers on other connections see only committed data.
    pub fn test_isolation(writer: &Connection, reader: &Connection) {
        writer.put(b"iso", b"before").expect("Failed to put");
        writer.start_transaction().expect("Failed to start");
        writer.put(b"iso", b"after").expect("Failed to put in transaction");
        assert_eq!(reader.get(b"iso").expect("Failed to read"), b"before");
        writer.commit().expect("Failed to commit");
        assert_eq!(reader.get(b"iso").expect("Failed to read"), b"after");
    }
}

/// Maintenance scenarios.
pub mod maintenance {
    use super::*;
    use sqlkv_core::CipherPassword;
    use std::path::Path;

    /// Rekey fails with `Busy` while another connection holds a transaction,
    /// then succeeds once it commits.
    pub fn test_rekey_waits_for_transaction(store: &TestStore, password: &CipherPassword) {
        let holder = store.connect();
        let other = store.connect();
        holder.start_transaction().expect("Failed to start");
        holder.put(b"pending", b"1").expect("Failed to put");

        assert!(other.rekey(password).unwrap_err().is_busy());

        holder.commit().expect("Failed to commit");
        other.rekey(password).expect("Failed to rekey");
        assert_eq!(other.get(b"pending").expect("Failed to read"), b"1");
    }

    /// A rejected import leaves the store exactly as it was.
    pub fn test_failed_import_is_harmless(conn: &Connection, bad_source: &Path) {
        conn.put(b"stay", b"here").expect("Failed to put");
        let before = conn.get_entries(b"").expect("Failed to scan");

        let err = conn
            .import(bad_source, &CipherPassword::empty())
            .expect_err("Import of a bad source must fail");
        assert!(!err.is_busy(), "unexpected busy: {err}");

        assert_eq!(conn.get_entries(b"").expect("Failed to scan"), before);
    }
}
