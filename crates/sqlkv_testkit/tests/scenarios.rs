//! End-to-end scenarios against the public API.

use proptest::prelude::*;
use sqlkv_core::{
    CipherPassword, CoreError, Database, Entry, StoreManager, StoreProperties, MAX_BATCH_SIZE,
};
use sqlkv_storage::{open_database, table_exists, OpenDbOptions, StorageError};
use sqlkv_testkit::prelude::*;
use tempfile::TempDir;

fn pw(s: &str) -> CipherPassword {
    CipherPassword::try_from(s).unwrap()
}

#[test]
fn put_then_get() {
    with_temp_store(|conn| {
        conn.put(b"a", b"1").unwrap();
        assert_eq!(conn.get(b"a").unwrap(), b"1");
        conn.put(b"a", b"2").unwrap();
        assert_eq!(conn.get(b"a").unwrap(), b"2");
    });
}

#[test]
fn unwritten_key_is_not_found() {
    with_temp_store(|conn| {
        assert!(conn.get(b"ghost").unwrap_err().is_not_found());
        assert!(conn.delete(b"ghost").unwrap_err().is_not_found());
    });
}

#[test]
fn empty_value_differs_from_deleted() {
    with_temp_store(|conn| {
        conn.put(b"k", b"").unwrap();
        assert_eq!(conn.get(b"k").unwrap(), Vec::<u8>::new());
        conn.delete(b"k").unwrap();
        assert!(conn.get(b"k").unwrap_err().is_not_found());
    });
}

#[test]
fn prefix_scan_contract() {
    with_temp_store(|conn| {
        conn.put(b"b", b"2").unwrap();
        conn.put(b"a", b"1").unwrap();
        conn.put(b"ab", b"3").unwrap();

        assert!(conn.get_entries(b"z").unwrap_err().is_not_found());
        assert_eq!(
            conn.get_entries(b"").unwrap(),
            vec![
                Entry::new(b"a".to_vec(), b"1".to_vec()),
                Entry::new(b"ab".to_vec(), b"3".to_vec()),
                Entry::new(b"b".to_vec(), b"2".to_vec()),
            ]
        );
        assert_eq!(conn.get_entries(b"a").unwrap().len(), 2);
    });
}

#[test]
fn delete_batch_partial_and_none() {
    with_temp_store(|conn| {
        conn.put(b"k1", b"v").unwrap();
        let keys = vec![b"k1".to_vec(), b"k2".to_vec()];
        conn.delete_batch(&keys).unwrap();
        assert!(conn.get(b"k1").unwrap_err().is_not_found());
        assert!(conn.delete_batch(&keys).unwrap_err().is_not_found());
    });
}

#[test]
fn validation_rejects_before_touching_store() {
    with_temp_store(|conn| {
        assert!(matches!(conn.put(b"", b"v"), Err(CoreError::InvalidArgs { .. })));
        let oversized: Vec<Entry> = (0..=MAX_BATCH_SIZE)
            .map(|i| Entry::new(indexed_key("b/", i), b"v".to_vec()))
            .collect();
        assert!(matches!(
            conn.put_batch(&oversized),
            Err(CoreError::InvalidArgs { .. })
        ));
        assert!(conn.get_entries(b"").unwrap_err().is_not_found());
    });
}

#[test]
fn rollback_discards_put() {
    with_temp_store(|conn| {
        conn.start_transaction().unwrap();
        conn.put(b"k", b"v").unwrap();
        conn.rollback().unwrap();
        assert!(conn.get(b"k").unwrap_err().is_not_found());
    });
}

#[test]
fn double_start_is_transact_state() {
    with_temp_store(|conn| {
        conn.start_transaction().unwrap();
        assert!(matches!(
            conn.start_transaction(),
            Err(CoreError::TransactState { .. })
        ));
        conn.rollback().unwrap();
    });
}

#[test]
fn rekey_busy_while_own_transaction_open() {
    let store = TestStore::file();
    let conn = store.connect();
    conn.put(b"k", b"v").unwrap();

    conn.start_transaction().unwrap();
    assert!(conn.rekey(&pw("new")).unwrap_err().is_busy());
    conn.commit().unwrap();
    conn.rekey(&pw("new")).unwrap();

    conn.start_transaction().unwrap();
    assert!(conn.rekey(&pw("newer")).unwrap_err().is_busy());
    conn.rollback().unwrap();
    conn.rekey(&pw("newer")).unwrap();
    assert_eq!(conn.get(b"k").unwrap(), b"v");
}

#[test]
fn failed_import_with_wrong_password_changes_nothing() {
    let (_dir, source) = scenarios::exported_file(
        "source-pw",
        &[Entry::new(b"k".to_vec(), b"from-source".to_vec())],
    );
    let store = TestStore::file();
    let conn = store.connect();
    conn.put(b"k", b"local").unwrap();
    conn.put(b"other", b"kept").unwrap();

    let err = conn.import(&source, &pw("wrong")).unwrap_err();
    assert!(matches!(err, CoreError::InvalidPasswordOrCorrupted));
    assert_eq!(conn.get(b"k").unwrap(), b"local");
    assert_eq!(conn.get(b"other").unwrap(), b"kept");

    conn.import(&source, &pw("source-pw")).unwrap();
    assert_eq!(conn.get(b"k").unwrap(), b"from-source");
    assert!(conn.get(b"other").unwrap_err().is_not_found());
}

#[test]
fn close_busy_while_snapshot_open() {
    let store = TestStore::file();
    let conn = store.connect();
    conn.put(b"k", b"before").unwrap();

    let snapshot = conn.get_snapshot().unwrap();
    conn.put(b"k", b"after").unwrap();
    assert_eq!(snapshot.get(b"k").unwrap(), b"before");

    assert!(conn.close().unwrap_err().is_busy());
    conn.release_snapshot(snapshot).unwrap();
    conn.close().unwrap();
}

#[test]
fn end_to_end_rekey_and_reopen() {
    let mut store = TestStore::file();
    {
        let conn = store.connect();
        conn.put(b"a", b"1").unwrap();
        conn.put(b"b", b"2").unwrap();
        assert_eq!(
            conn.get_entries(b"").unwrap(),
            vec![
                Entry::new(b"a".to_vec(), b"1".to_vec()),
                Entry::new(b"b".to_vec(), b"2".to_vec()),
            ]
        );
        conn.rekey(&pw("new-password")).unwrap();
    }
    store.reopen();
    assert_eq!(store.props.password, pw("new-password"));
    assert_eq!(store.connect().get(b"a").unwrap(), b"1");

    // The old password no longer opens the store.
    let stale = store.props.clone().password(CipherPassword::empty());
    store.close().unwrap();
    assert!(matches!(
        Database::open(stale),
        Err(CoreError::InvalidPasswordOrCorrupted)
    ));
}

#[test]
fn export_writes_a_standalone_encrypted_file() {
    let store = scenarios::populated_store(10);
    let target = store.scratch_path("copy.db");
    store.export(&target, &pw("copy-pw")).unwrap();

    assert!(matches!(
        open_database(&OpenDbOptions::file(&target).create_if_missing(false)),
        Err(StorageError::InvalidKey)
    ));
    let raw = open_database(
        &OpenDbOptions::file(&target)
            .password(pw("copy-pw"))
            .create_if_missing(false),
    )
    .unwrap();
    assert!(table_exists(&raw, sqlkv_core::DATA_TABLE).unwrap());

    assert!(matches!(
        store.export(&target, &pw("copy-pw")),
        Err(CoreError::InvalidArgs { .. })
    ));
}

#[test]
fn observers_see_committed_changes_only() {
    with_temp_store(|conn| {
        let (id, rx) = conn.register_observer(b"user/").unwrap();

        conn.start_transaction().unwrap();
        conn.put(b"user/1", b"alice").unwrap();
        conn.rollback().unwrap();
        assert!(rx.try_recv().is_err());

        conn.put(b"user/2", b"bob").unwrap();
        conn.put(b"other", b"x").unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.entries_put, vec![Entry::new(b"user/2".to_vec(), b"bob".to_vec())]);
        assert!(rx.try_recv().is_err());

        conn.unregister_observer(id).unwrap();
        assert!(conn.unregister_observer(id).unwrap_err().is_not_found());
    });
}

#[test]
fn manager_shares_handles_across_opens() {
    let dir = TempDir::new().unwrap();
    let manager = StoreManager::new();
    let props = StoreProperties::new(dir.path(), "shared").password(pw("pw"));

    let first = manager.open(props.clone()).unwrap();
    first.new_connection().unwrap().put(b"k", b"v").unwrap();
    let second = manager.open(props).unwrap();
    assert_eq!(second.new_connection().unwrap().get(b"k").unwrap(), b"v");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn put_get_law(entry in entry_strategy()) {
        with_temp_store(|conn| {
            conn.put(&entry.key, &entry.value).unwrap();
            prop_assert_eq!(conn.get(&entry.key).unwrap(), entry.value.clone());
            Ok(())
        })?;
    }

    #[test]
    fn scan_returns_batch_sorted(batch in batch_strategy()) {
        with_temp_store(|conn| {
            conn.put_batch(&batch).unwrap();
            let mut expected = batch.clone();
            expected.sort();
            prop_assert_eq!(conn.get_entries(b"").unwrap(), expected);
            Ok(())
        })?;
    }
}
