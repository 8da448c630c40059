//! Client connections.
//!
//! A [`Connection`] is the object application code works with. Every
//! single-shot call validates its arguments before any executor is touched,
//! then runs in one of two ways:
//!
//! - no transaction open: an implicit transaction is begun for the call and
//!   committed on success or rolled back on failure
//! - explicit transaction open: the call joins it and nothing is committed
//!
//! ```rust,ignore
//! let conn = db.new_connection()?;
//! conn.put(b"a", b"1")?;              // implicit, committed
//!
//! conn.start_transaction()?;
//! conn.put(b"b", b"2")?;
//! conn.delete(b"a")?;
//! conn.commit()?;                     // both or neither
//! ```

mod snapshot;
mod transaction;

pub use snapshot::Snapshot;
pub(crate) use transaction::ActiveTransaction;

use crate::change_feed::ChangedData;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::executor::{Executor, TransactType};
use crate::types::{
    check_entries, check_key, check_keys, check_prefix, check_value, ConnectionId, Entry, Key,
    ObserverId, SnapshotId, Value,
};
use parking_lot::Mutex;
use sqlkv_storage::CipherPassword;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, warn};
use transaction::Transaction;

/// Per-connection state, also visible to maintenance running on other
/// connections of the same database.
pub(crate) struct ConnectionState {
    pub(crate) id: ConnectionId,
    pub(crate) transaction: Mutex<Option<ActiveTransaction>>,
    pub(crate) snapshots: Mutex<HashSet<SnapshotId>>,
    /// Set while a rekey or import holds the database.
    pub(crate) exclusive: AtomicBool,
    pub(crate) closed: AtomicBool,
}

impl ConnectionState {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self {
            id,
            transaction: Mutex::new(None),
            snapshots: Mutex::new(HashSet::new()),
            exclusive: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A client connection to an open [`Database`].
///
/// Connections are `Send + Sync`; calls from several threads on one
/// connection share its transaction.
pub struct Connection {
    db: Arc<Database>,
    state: Arc<ConnectionState>,
}

impl Connection {
    pub(crate) fn new(db: Arc<Database>, state: Arc<ConnectionState>) -> Self {
        Self { db, state }
    }

    /// Returns this connection's ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.state.id
    }

    /// Returns the database this connection belongs to.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Point lookup.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key has never been written or was deleted.
    pub fn get(&self, key: &[u8]) -> CoreResult<Value> {
        check_key(key)?;
        self.db.stats_ref().record_read();
        self.read(|executor| executor.get(key))
    }

    /// Inserts or replaces one entry. An empty value is a stored value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        check_key(key)?;
        check_value(value)?;
        self.write(1, |executor, changes| {
            executor.put(key, value)?;
            if let Some(changes) = changes {
                changes.record_put(&[Entry::new(key, value)]);
            }
            Ok(())
        })?;
        self.db.stats_ref().record_writes(1);
        Ok(())
    }

    /// Removes one key.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key did not exist.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        check_key(key)?;
        self.db.stats_ref().record_delete();
        self.write(1, |executor, changes| {
            executor.delete(key)?;
            if let Some(changes) = changes {
                changes.record_delete(vec![key.to_vec()]);
            }
            Ok(())
        })
    }

    /// Removes every entry.
    pub fn clear(&self) -> CoreResult<()> {
        self.write(0, |executor, changes| {
            executor.clear()?;
            if let Some(changes) = changes {
                changes.record_clear();
            }
            Ok(())
        })
    }

    /// Entries whose key starts with `prefix`, keys ascending. An empty
    /// prefix returns everything.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing matches; an empty list is never returned.
    pub fn get_entries(&self, prefix: &[u8]) -> CoreResult<Vec<Entry>> {
        check_prefix(prefix)?;
        self.db.stats_ref().record_scan();
        self.read(|executor| executor.get_entries(prefix))
    }

    /// Upserts up to [`MAX_BATCH_SIZE`](crate::MAX_BATCH_SIZE) entries as
    /// one unit.
    pub fn put_batch(&self, entries: &[Entry]) -> CoreResult<()> {
        check_entries(entries)?;
        self.write(entries.len(), |executor, changes| {
            executor.put_batch(entries)?;
            if let Some(changes) = changes {
                changes.record_put(entries);
            }
            Ok(())
        })?;
        self.db.stats_ref().record_writes(entries.len());
        Ok(())
    }

    /// Removes up to [`MAX_BATCH_SIZE`](crate::MAX_BATCH_SIZE) keys as one
    /// unit.
    ///
    /// Succeeds if at least one key existed.
    ///
    /// # Errors
    ///
    /// `NotFound` only if none of the keys existed.
    pub fn delete_batch(&self, keys: &[Key]) -> CoreResult<()> {
        check_keys(keys)?;
        self.db.stats_ref().record_delete();
        self.write(keys.len(), |executor, changes| {
            let removed = executor.delete_batch(keys)?;
            if let Some(changes) = changes {
                changes.record_delete(removed);
            }
            Ok(())
        })
    }

    /// Begins an explicit transaction holding the write executor.
    ///
    /// # Errors
    ///
    /// `TransactState` if this connection already has one open.
    pub fn start_transaction(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut slot = self.state.transaction.lock();
        if slot.is_some() {
            return Err(CoreError::transact_state("transaction already started"));
        }
        *slot = Some(ActiveTransaction::begin(&self.db, TransactType::Immediate)?);
        debug!(conn = %self.state.id, "transaction started");
        Ok(())
    }

    /// Commits the explicit transaction and returns its executor.
    ///
    /// # Errors
    ///
    /// `TransactState` if no transaction is open.
    pub fn commit(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let active = self
            .state
            .transaction
            .lock()
            .take()
            .ok_or_else(|| CoreError::transact_state("no transaction to commit"))?;
        active.commit(&self.db)
    }

    /// Rolls the explicit transaction back and returns its executor.
    ///
    /// # Errors
    ///
    /// `TransactState` if no transaction is open.
    pub fn rollback(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let active = self
            .state
            .transaction
            .lock()
            .take()
            .ok_or_else(|| CoreError::transact_state("no transaction to roll back"))?;
        active.rollback(&self.db)
    }

    /// Returns true while an explicit transaction is open.
    #[must_use]
    pub fn is_transaction_started(&self) -> bool {
        self.state.transaction.lock().is_some()
    }

    /// Opens a read-only view of the store as of now.
    ///
    /// The view lives on its own connection and holds one read executor
    /// until released. While any snapshot is open this connection cannot be
    /// closed and the store cannot be rekeyed or imported.
    ///
    /// # Errors
    ///
    /// - `NotSupported` for in-memory stores and stores without readers
    /// - `Busy` while a rekey or import holds the store
    pub fn get_snapshot(&self) -> CoreResult<Snapshot> {
        self.ensure_open()?;
        if self.db.is_memory() || self.db.engine().config().max_read_executors == 0 {
            return Err(CoreError::not_supported("snapshot without read executors"));
        }
        if self.state.exclusive.load(Ordering::SeqCst) {
            return Err(CoreError::busy("store is held by maintenance"));
        }

        let view = self.db.new_connection()?;
        view.pin_read_view()?;
        let id = self.db.next_snapshot_id();
        self.state.snapshots.lock().insert(id);
        self.db.stats_ref().record_snapshot();
        debug!(conn = %self.state.id, snapshot = %id, "snapshot opened");
        Ok(Snapshot::new(id, Arc::clone(&self.state), view))
    }

    /// Releases a snapshot obtained from this connection.
    ///
    /// # Errors
    ///
    /// `InvalidArgs` if the snapshot came from another connection. The
    /// snapshot is released from its own connection regardless.
    pub fn release_snapshot(&self, snapshot: Snapshot) -> CoreResult<()> {
        if snapshot.owner_id() != self.state.id {
            return Err(CoreError::invalid_args(format!(
                "snapshot {} belongs to {}",
                snapshot.id(),
                snapshot.owner_id()
            )));
        }
        drop(snapshot);
        Ok(())
    }

    /// Subscribes to committed changes under `prefix`.
    ///
    /// # Errors
    ///
    /// `Busy` while a rekey or import holds the store.
    pub fn register_observer(
        &self,
        prefix: &[u8],
    ) -> CoreResult<(ObserverId, Receiver<ChangedData>)> {
        self.ensure_open()?;
        check_prefix(prefix)?;
        if self.state.exclusive.load(Ordering::SeqCst) {
            return Err(CoreError::busy("store is held by maintenance"));
        }
        let (id, receiver) = self.db.feed().subscribe(self.state.id, prefix);
        // Maintenance may have raised the flag while we subscribed.
        if self.state.exclusive.load(Ordering::SeqCst) {
            self.db.feed().unsubscribe(self.state.id, id);
            return Err(CoreError::busy("store is held by maintenance"));
        }
        debug!(conn = %self.state.id, observer = %id, "observer registered");
        Ok((id, receiver))
    }

    /// Removes an observer registered on this connection.
    ///
    /// # Errors
    ///
    /// `NotFound` if the ID is unknown to this connection.
    pub fn unregister_observer(&self, id: ObserverId) -> CoreResult<()> {
        self.ensure_open()?;
        if self.db.feed().unsubscribe(self.state.id, id) {
            Ok(())
        } else {
            Err(CoreError::NotFound)
        }
    }

    /// Re-encrypts the store with `password`.
    ///
    /// # Errors
    ///
    /// `Busy` if this connection has a transaction open, or anything else
    /// holds the store. See [`Database::rekey`].
    pub fn rekey(&self, password: &CipherPassword) -> CoreResult<()> {
        self.ensure_open()?;
        self.ensure_no_transaction("rekey")?;
        self.db.rekey(password)
    }

    /// Replaces the store's contents with the file at `source`.
    ///
    /// See [`Database::import`].
    pub fn import(&self, source: &Path, password: &CipherPassword) -> CoreResult<()> {
        self.ensure_open()?;
        self.ensure_no_transaction("import")?;
        self.db.import(source, password)
    }

    /// Writes a copy of the store to `target`.
    ///
    /// See [`Database::export`].
    pub fn export(&self, target: &Path, password: &CipherPassword) -> CoreResult<()> {
        self.ensure_open()?;
        self.ensure_no_transaction("export")?;
        self.db.export(target, password)
    }

    /// Closes the connection.
    ///
    /// A dangling transaction is rolled back and observers are removed.
    /// Further calls fail with `InvalidDb`.
    ///
    /// # Errors
    ///
    /// `Busy` while snapshots from this connection are open.
    pub fn close(&self) -> CoreResult<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.pre_close()?;
        self.teardown();
        debug!(conn = %self.state.id, "connection closed");
        Ok(())
    }

    fn pre_close(&self) -> CoreResult<()> {
        let open = self.state.snapshots.lock().len();
        if open > 0 {
            return Err(CoreError::busy(format!("{open} snapshot(s) still open")));
        }
        let dangling = self.state.transaction.lock().take();
        if let Some(active) = dangling {
            warn!(conn = %self.state.id, "transaction open at close, rolling back");
            if let Err(err) = active.rollback(&self.db) {
                warn!(conn = %self.state.id, error = %err, "rollback at close failed");
            }
        }
        Ok(())
    }

    fn teardown(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.db.feed().unsubscribe_all(self.state.id);
    }

    /// Begins the read transaction that backs a snapshot.
    pub(crate) fn pin_read_view(&self) -> CoreResult<()> {
        let mut active = ActiveTransaction::begin(&self.db, TransactType::Deferred)?;
        active.executor().pin_read_view()?;
        *self.state.transaction.lock() = Some(active);
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.state.is_closed() {
            return Err(CoreError::invalid_db(format!(
                "connection {} is closed",
                self.state.id
            )));
        }
        self.db.ensure_open()
    }

    fn ensure_no_transaction(&self, operation: &str) -> CoreResult<()> {
        if self.state.transaction.lock().is_some() {
            return Err(CoreError::busy(format!(
                "{operation} while {} has a transaction open",
                self.state.id
            )));
        }
        Ok(())
    }

    fn read<T>(&self, op: impl FnOnce(&mut Executor) -> CoreResult<T>) -> CoreResult<T> {
        self.ensure_open()?;
        let mut slot = self.state.transaction.lock();
        if let Some(active) = slot.as_mut() {
            return op(active.executor());
        }
        // Implicit reads do not hold the slot so they can run side by side.
        drop(slot);
        let mut txn = Transaction::Owned(ActiveTransaction::begin(&self.db, TransactType::Deferred)?);
        let result = op(txn.executor());
        txn.finish(result, &self.db)
    }

    fn write<T>(
        &self,
        count: usize,
        op: impl FnOnce(&mut Executor, Option<&mut ChangedData>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.ensure_open()?;
        let limit = self.db.engine().config().transaction_entry_limit;
        let observed = self.db.feed().subscriber_count() > 0;

        let mut slot = self.state.transaction.lock();
        let mut txn = match slot.as_mut() {
            Some(active) => Transaction::Borrowed(active),
            None => Transaction::Owned(ActiveTransaction::begin(&self.db, TransactType::Immediate)?),
        };
        let result = txn.check_room(count, limit).and_then(|()| {
            let (executor, changes) = txn.parts(observed);
            op(executor, changes)
        });
        if result.is_ok() {
            txn.add_entries(count);
        }
        txn.finish(result, &self.db)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state.is_closed() {
            return;
        }
        // Dropping the transaction recycles its executor, which rolls back.
        drop(self.state.transaction.lock().take());
        self.teardown();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.state.id)
            .field("closed", &self.state.is_closed())
            .finish()
    }
}
