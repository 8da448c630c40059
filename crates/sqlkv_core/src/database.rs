//! Database handle.

use crate::change_feed::ChangeFeed;
use crate::connection::{Connection, ConnectionState};
use crate::dir::{self, StoreDir};
use crate::engine::{Engine, EngineState, Permission};
use crate::error::{CoreError, CoreResult};
use crate::maintenance;
use crate::properties::{NoSecurityCapability, SecurityCapability, SecurityLabel, StoreProperties};
use crate::stats::{StatsSnapshot, StoreStats};
use crate::types::{ConnectionId, SnapshotId};
use parking_lot::Mutex;
use sqlkv_storage::CipherPassword;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

const SCHEMA_META_KEY: &[u8] = b"schema";

/// The handle of one open store.
///
/// `Database` owns the store's [`Engine`] and directory lock. It provides:
/// - Lifecycle (open, close, remove)
/// - Connections
/// - Rekey, import and export
/// - Version, size, integrity and statistics
///
/// # Opening a Store
///
/// ```rust,ignore
/// use sqlkv_core::{Database, StoreProperties};
///
/// let props = StoreProperties::new("/data/stores", "settings");
/// let db = Database::open(props)?;
///
/// let conn = db.new_connection()?;
/// conn.put(b"theme", b"dark")?;
/// conn.close()?;
///
/// db.close()?;
/// ```
///
/// # In-Memory Stores
///
/// ```rust,ignore
/// let db = Database::open(StoreProperties::in_memory("scratch"))?;
/// ```
///
/// In-memory stores have no snapshots and no rekey, import or export.
pub struct Database {
    /// Store name, for logs.
    label: String,
    /// Executor pool.
    engine: Arc<Engine>,
    /// Store directory (holds the lock). None for in-memory stores and after close.
    dir: Mutex<Option<StoreDir>>,
    /// Security posture of the process.
    capability: Arc<dyn SecurityCapability>,
    /// Every connection handed out, including snapshot views.
    connections: Mutex<Vec<Weak<ConnectionState>>>,
    /// Serializes imports.
    import_lock: Mutex<()>,
    /// Committed-change subscribers.
    feed: ChangeFeed,
    /// Counters.
    stats: Arc<StoreStats>,
    memory: bool,
    is_open: AtomicBool,
    next_connection_id: AtomicU64,
    next_snapshot_id: AtomicU64,
}

impl Database {
    /// Opens a store.
    ///
    /// The method:
    /// - Creates the store directory if missing (unless `create_if_missing`
    ///   is false) and takes its lock
    /// - Restores the live file from any interrupted rekey or import
    /// - Opens the engine and creates the tables
    /// - Records the schema, or checks it against the stored one
    ///
    /// # Errors
    ///
    /// - `StoreLocked` if another handle has the store open
    /// - `InvalidDb` if the store does not exist and may not be created
    /// - `InvalidPasswordOrCorrupted` if the password does not open the file
    /// - `SchemaMismatch` if the stored schema differs from a non-empty
    ///   requested one
    pub fn open(props: StoreProperties) -> CoreResult<Arc<Self>> {
        Self::open_with_capability(props, Arc::new(NoSecurityCapability))
    }

    /// Opens a store with a process capability adapter.
    pub fn open_with_capability(
        mut props: StoreProperties,
        capability: Arc<dyn SecurityCapability>,
    ) -> CoreResult<Arc<Self>> {
        let stats = Arc::new(StoreStats::new());
        let label = props.store_id.clone();
        let memory = props.memory;

        let (engine, dir) = if memory {
            let engine = Engine::init(props.clone(), None, Arc::clone(&stats))?;
            (engine, None)
        } else {
            let store_dir = props.store_dir();
            let dir = StoreDir::open(&store_dir, props.create_if_missing)?;
            maintenance::recover(&dir)?;
            if !props.create_if_missing && !dir.db_exists() {
                return Err(CoreError::invalid_db(format!(
                    "store does not exist: {}",
                    store_dir.display()
                )));
            }
            if props.security.is_unset() {
                props.security = capability.security_option(&store_dir)?;
            }
            let engine = Engine::init(props.clone(), Some(dir.db_path()), Arc::clone(&stats))?;
            (engine, Some(dir))
        };

        check_schema(&engine, &props.schema)?;

        info!(store = %label, memory, "database opened");
        Ok(Arc::new(Self {
            label,
            engine,
            dir: Mutex::new(dir),
            capability,
            connections: Mutex::new(Vec::new()),
            import_lock: Mutex::new(()),
            feed: ChangeFeed::new(),
            stats,
            memory,
            is_open: AtomicBool::new(true),
            next_connection_id: AtomicU64::new(1),
            next_snapshot_id: AtomicU64::new(1),
        }))
    }

    /// Deletes a closed store's directory.
    ///
    /// # Errors
    ///
    /// `StoreLocked` while a handle has the store open, `NotFound` if there
    /// is nothing to remove.
    pub fn remove(props: &StoreProperties) -> CoreResult<()> {
        if props.memory {
            return Ok(());
        }
        let path = props.store_dir();
        dir::remove_store_dir(&path)?;
        info!(store = %props.store_id, path = %path.display(), "store removed");
        Ok(())
    }

    /// Creates a new connection.
    pub fn new_connection(self: &Arc<Self>) -> CoreResult<Connection> {
        self.ensure_open()?;
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let state = Arc::new(ConnectionState::new(id));
        {
            let mut connections = self.connections.lock();
            connections.retain(|c| c.strong_count() > 0);
            connections.push(Arc::downgrade(&state));
        }
        debug!(store = %self.label, conn = %id, "connection opened");
        Ok(Connection::new(Arc::clone(self), state))
    }

    /// Closes the store and releases its directory lock.
    ///
    /// # Errors
    ///
    /// `Busy` while connections or snapshots are still open.
    pub fn close(&self) -> CoreResult<()> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Ok(());
        }
        let live = self.live_connections().len();
        if live > 0 {
            return Err(CoreError::busy(format!("{live} connection(s) still open")));
        }
        self.engine.close()?;
        self.is_open.store(false, Ordering::SeqCst);
        self.dir.lock().take();
        info!(store = %self.label, "database closed");
        Ok(())
    }

    /// Returns true until [`Database::close`] succeeds.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Returns true for an in-memory store.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.memory
    }

    /// Returns the stored user version.
    pub fn get_version(&self) -> CoreResult<i32> {
        self.ensure_open()?;
        self.engine
            .find_executor(false, Permission::Normal)?
            .get_version()
    }

    /// Stores the user version.
    pub fn set_version(&self, version: i32) -> CoreResult<()> {
        self.ensure_open()?;
        self.engine
            .find_executor(true, Permission::Normal)?
            .set_version(version)
    }

    /// Size in bytes of the live file and its sidecars.
    ///
    /// # Errors
    ///
    /// `NotSupported` for in-memory stores.
    pub fn get_size(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        match self.dir.lock().as_ref() {
            Some(dir) => dir.db_size(),
            None => Err(CoreError::not_supported("size of an in-memory store")),
        }
    }

    /// Runs the engine's integrity check. An empty list means healthy.
    pub fn check_integrity(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        let writable = self.engine.config().max_write_executors == 1;
        self.engine
            .find_executor(writable, Permission::Normal)?
            .check_integrity()
    }

    /// Re-encrypts the store with `password`.
    ///
    /// Takes the rekey token, then requires every connection to be free of
    /// transactions, snapshots and observers. The engine is closed, the file
    /// rewritten under the new key and the engine reopened. On failure the
    /// old file and password stay in effect.
    ///
    /// # Errors
    ///
    /// - `Busy` if anything holds the store
    /// - `NotSupported` for in-memory stores (rekey between two empty
    ///   passwords succeeds) and for access-controlled labels above S2
    pub fn rekey(&self, password: &CipherPassword) -> CoreResult<()> {
        self.ensure_open()?;
        if self.memory {
            if password.is_empty() && self.engine.password().is_empty() {
                return Ok(());
            }
            return Err(CoreError::not_supported("rekey of an in-memory store"));
        }
        self.check_access_control("rekey")?;

        let permit = self.engine.try_to_disable(true, Permission::RekeyExclusive)?;
        let _exclusive = self.pre_check_exclusive_status()?;
        self.check_engine_state()?;

        let dir = self.dir.lock();
        let dir = dir.as_ref().ok_or_else(|| self.closed_error())?;
        info!(store = %self.label, "rekey started");
        maintenance::rekey(&self.engine, &permit, dir, password)?;
        self.stats.record_rekey();
        Ok(())
    }

    /// Replaces the store's contents with the file at `source`.
    ///
    /// The source must open with `password` and hold an entry table. Its
    /// contents are re-encrypted with this store's password. Imports are
    /// serialized; reads and writes are refused for the duration.
    ///
    /// # Errors
    ///
    /// - `Busy` if anything holds the store
    /// - `InvalidArgs` if the source is missing or not a store
    /// - `InvalidPasswordOrCorrupted` if `password` does not open it
    /// - `NotSupported` for in-memory stores and access-controlled labels
    pub fn import(&self, source: &Path, password: &CipherPassword) -> CoreResult<()> {
        self.ensure_open()?;
        if self.memory {
            return Err(CoreError::not_supported("import into an in-memory store"));
        }
        self.check_access_control("import")?;

        let _serial = self.import_lock.lock();
        let permit = self.engine.try_to_disable(true, Permission::ImportExclusive)?;
        let _exclusive = self.pre_check_exclusive_status()?;
        self.check_engine_state()?;

        let dir = self.dir.lock();
        let dir = dir.as_ref().ok_or_else(|| self.closed_error())?;
        info!(store = %self.label, source = %source.display(), "import started");
        maintenance::import(&self.engine, &permit, dir, source, password)?;
        self.stats.record_import();
        Ok(())
    }

    /// Writes a copy of the store to `target`, encrypted with `password`
    /// (plaintext when empty).
    ///
    /// Holds the write executor while copying; readers keep working.
    ///
    /// # Errors
    ///
    /// - `InvalidArgs` if `target` exists
    /// - `NotSupported` for in-memory stores and access-controlled labels
    pub fn export(&self, target: &Path, password: &CipherPassword) -> CoreResult<()> {
        self.ensure_open()?;
        if self.memory {
            return Err(CoreError::not_supported("export of an in-memory store"));
        }
        self.check_access_control("export")?;
        self.check_engine_state()?;

        let mut writer = self.engine.find_executor(true, Permission::Normal)?;
        maintenance::export(&mut writer, target, password)?;
        self.stats.record_export();
        Ok(())
    }

    /// Installs a callback run when an executor reporting corruption is
    /// returned to the pool.
    pub fn set_corruption_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.engine.set_corruption_handler(Some(Arc::new(handler)));
    }

    /// Returns true once corruption has been observed.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        self.engine.is_corrupted()
    }

    /// Returns a copy of the counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the live store properties.
    #[must_use]
    pub fn properties(&self) -> StoreProperties {
        self.engine.properties()
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub(crate) fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub(crate) fn stats_ref(&self) -> &StoreStats {
        &self.stats
    }

    pub(crate) fn next_snapshot_id(&self) -> SnapshotId {
        SnapshotId(self.next_snapshot_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(self.closed_error())
        }
    }

    fn closed_error(&self) -> CoreError {
        CoreError::invalid_db(format!("store {} is closed", self.label))
    }

    fn live_connections(&self) -> Vec<Arc<ConnectionState>> {
        let mut connections = self.connections.lock();
        connections.retain(|c| c.strong_count() > 0);
        connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .collect()
    }

    /// Marks every connection exclusive, then verifies none of them holds
    /// an observer, a snapshot or a transaction.
    ///
    /// The flags are reset when the returned guard drops.
    fn pre_check_exclusive_status(&self) -> CoreResult<ExclusiveGuard> {
        let guard = ExclusiveGuard::raise(self.live_connections());
        for state in &guard.states {
            if self.feed.count_for(state.id) > 0 {
                return Err(self.refuse(format!("{} has observers", state.id)));
            }
            match state.snapshots.try_lock() {
                Some(snapshots) if snapshots.is_empty() => {}
                _ => return Err(self.refuse(format!("{} has open snapshots", state.id))),
            }
            match state.transaction.try_lock() {
                Some(transaction) if transaction.is_none() => {}
                _ => return Err(self.refuse(format!("{} has a transaction open", state.id))),
            }
        }
        Ok(guard)
    }

    fn refuse(&self, reason: String) -> CoreError {
        self.stats.record_busy();
        debug!(store = %self.label, %reason, "exclusive pre-check refused");
        CoreError::busy(reason)
    }

    fn check_engine_state(&self) -> CoreResult<()> {
        match self.engine.state() {
            EngineState::MainDb => Ok(()),
            EngineState::CacheDb => Err(CoreError::not_supported("maintenance on a cache database")),
            EngineState::Invalid => Err(CoreError::invalid_db(format!(
                "store {} has no open executors",
                self.label
            ))),
        }
    }

    fn check_access_control(&self, operation: &str) -> CoreResult<()> {
        let label = self.engine.properties().security.label;
        if self.capability.is_access_controlled() && label > SecurityLabel::S2 {
            warn!(store = %self.label, ?label, operation, "refused while files are access controlled");
            return Err(CoreError::not_supported(format!(
                "{operation} while files are access controlled"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.label)
            .field("memory", &self.memory)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Per-connection exclusive flags raised for one maintenance operation.
struct ExclusiveGuard {
    states: Vec<Arc<ConnectionState>>,
}

impl ExclusiveGuard {
    fn raise(states: Vec<Arc<ConnectionState>>) -> Self {
        for state in &states {
            state.exclusive.store(true, Ordering::SeqCst);
        }
        Self { states }
    }
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        for state in &self.states {
            state.exclusive.store(false, Ordering::SeqCst);
        }
    }
}

/// Records the requested schema, or checks it against the stored one.
///
/// A store opened without a schema adopts the stored one.
fn check_schema(engine: &Arc<Engine>, requested: &str) -> CoreResult<()> {
    let writable = engine.config().max_write_executors == 1;
    let mut executor = engine.find_executor(writable, Permission::Normal)?;
    match executor.get_meta(SCHEMA_META_KEY)? {
        Some(stored) => {
            let stored = String::from_utf8_lossy(&stored).into_owned();
            if !requested.is_empty() && stored != requested {
                return Err(CoreError::SchemaMismatch {
                    stored,
                    requested: requested.to_string(),
                });
            }
            engine.adopt_schema(stored);
        }
        None if writable && !requested.is_empty() => {
            executor.put_meta(SCHEMA_META_KEY, requested.as_bytes())?;
        }
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::properties::{SecurityFlag, SecurityOption};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::tempdir;

    fn props(root: &Path) -> StoreProperties {
        StoreProperties::new(root, "db-test").engine(
            EngineConfig::new()
                .acquire_timeout(Duration::from_millis(50))
                .drain_timeout(Duration::from_millis(50)),
        )
    }

    fn pw(text: &str) -> CipherPassword {
        CipherPassword::try_from(text).unwrap()
    }

    struct LockedDevice;

    impl SecurityCapability for LockedDevice {
        fn security_option(&self, _path: &Path) -> CoreResult<SecurityOption> {
            Ok(SecurityOption::new(SecurityLabel::S3, SecurityFlag::Ece))
        }

        fn is_access_controlled(&self) -> bool {
            true
        }
    }

    #[test]
    fn open_close_reopen() {
        let tmp = tempdir().unwrap();
        let db = Database::open(props(tmp.path())).unwrap();
        let conn = db.new_connection().unwrap();
        conn.put(b"k", b"v").unwrap();

        assert!(matches!(
            Database::open(props(tmp.path())),
            Err(CoreError::StoreLocked)
        ));
        assert!(db.close().unwrap_err().is_busy());
        conn.close().unwrap();
        db.close().unwrap();
        assert!(matches!(db.new_connection(), Err(CoreError::InvalidDb { .. })));

        let db = Database::open(props(tmp.path())).unwrap();
        assert_eq!(db.new_connection().unwrap().get(b"k").unwrap(), b"v");
    }

    #[test]
    fn missing_store_without_create() {
        let tmp = tempdir().unwrap();
        let result = Database::open(props(tmp.path()).create_if_missing(false));
        assert!(matches!(result, Err(CoreError::InvalidDb { .. })));
    }

    #[test]
    fn wrong_password_is_rejected() {
        let tmp = tempdir().unwrap();
        let db = Database::open(props(tmp.path()).password(pw("right"))).unwrap();
        db.close().unwrap();
        drop(db);

        let result = Database::open(props(tmp.path()).password(pw("wrong")));
        assert!(matches!(result, Err(CoreError::InvalidPasswordOrCorrupted)));
    }

    #[test]
    fn schema_is_recorded_and_checked() {
        let tmp = tempdir().unwrap();
        let db = Database::open(props(tmp.path()).schema("v1")).unwrap();
        db.close().unwrap();
        drop(db);

        let result = Database::open(props(tmp.path()).schema("v2"));
        assert!(matches!(result, Err(CoreError::SchemaMismatch { .. })));

        let db = Database::open(props(tmp.path())).unwrap();
        assert_eq!(db.properties().schema, "v1");
    }

    #[test]
    fn version_and_size() {
        let tmp = tempdir().unwrap();
        let db = Database::open(props(tmp.path())).unwrap();
        assert_eq!(db.get_version().unwrap(), 0);
        db.set_version(7).unwrap();
        assert_eq!(db.get_version().unwrap(), 7);
        assert!(db.get_size().unwrap() > 0);
        assert!(db.check_integrity().unwrap().is_empty());
    }

    #[test]
    fn rekey_then_reopen_with_new_password() {
        let tmp = tempdir().unwrap();
        let db = Database::open(props(tmp.path()).password(pw("old"))).unwrap();
        let conn = db.new_connection().unwrap();
        conn.put(b"a", b"1").unwrap();

        conn.rekey(&pw("new")).unwrap();
        assert_eq!(conn.get(b"a").unwrap(), b"1");
        assert_eq!(db.stats().rekeys, 1);
        conn.close().unwrap();
        db.close().unwrap();
        drop((conn, db));

        assert!(matches!(
            Database::open(props(tmp.path()).password(pw("old"))),
            Err(CoreError::InvalidPasswordOrCorrupted)
        ));
        let db = Database::open(props(tmp.path()).password(pw("new"))).unwrap();
        assert_eq!(db.new_connection().unwrap().get(b"a").unwrap(), b"1");
    }

    #[test]
    fn rekey_refused_while_other_connection_busy() {
        let tmp = tempdir().unwrap();
        let db = Database::open(props(tmp.path())).unwrap();
        let a = db.new_connection().unwrap();
        let b = db.new_connection().unwrap();

        let (id, _rx) = b.register_observer(b"").unwrap();
        assert!(a.rekey(&pw("x")).unwrap_err().is_busy());
        b.unregister_observer(id).unwrap();

        a.start_transaction().unwrap();
        assert!(a.rekey(&pw("x")).unwrap_err().is_busy());
        assert!(b.rekey(&pw("x")).unwrap_err().is_busy());
        a.rollback().unwrap();

        b.rekey(&pw("x")).unwrap();
        // Flags and token are restored after every attempt.
        a.put(b"k", b"v").unwrap();
        b.register_observer(b"").unwrap();
    }

    #[test]
    fn export_then_import_round_trip() {
        let tmp = tempdir().unwrap();
        let source = Database::open(props(&tmp.path().join("a"))).unwrap();
        let conn = source.new_connection().unwrap();
        conn.put(b"k", b"exported").unwrap();
        let file = tmp.path().join("copy.db");
        conn.export(&file, &pw("copy")).unwrap();
        assert!(matches!(
            conn.export(&file, &pw("copy")),
            Err(CoreError::InvalidArgs { .. })
        ));

        let target = Database::open(props(&tmp.path().join("b"))).unwrap();
        let conn = target.new_connection().unwrap();
        conn.put(b"k", b"local").unwrap();
        conn.put(b"only-local", b"x").unwrap();

        conn.import(&file, &pw("copy")).unwrap();
        assert_eq!(conn.get(b"k").unwrap(), b"exported");
        assert!(conn.get(b"only-local").unwrap_err().is_not_found());
        assert_eq!(target.stats().imports, 1);
    }

    #[test]
    fn failed_import_leaves_store_unchanged() {
        let tmp = tempdir().unwrap();
        let source = Database::open(props(&tmp.path().join("a"))).unwrap();
        let file = tmp.path().join("copy.db");
        source.export(&file, &pw("right")).unwrap();

        let db = Database::open(props(&tmp.path().join("b"))).unwrap();
        let conn = db.new_connection().unwrap();
        conn.put(b"k", b"v").unwrap();

        assert!(matches!(
            conn.import(&file, &pw("wrong")),
            Err(CoreError::InvalidPasswordOrCorrupted)
        ));
        assert_eq!(conn.get(b"k").unwrap(), b"v");
        conn.put(b"k2", b"v2").unwrap();
    }

    #[test]
    fn memory_store_refuses_maintenance() {
        let db = Database::open(StoreProperties::in_memory("mem")).unwrap();
        db.rekey(&CipherPassword::empty()).unwrap();
        assert!(matches!(db.rekey(&pw("x")), Err(CoreError::NotSupported { .. })));
        assert!(matches!(
            db.export(Path::new("/tmp/never"), &CipherPassword::empty()),
            Err(CoreError::NotSupported { .. })
        ));
        assert!(matches!(db.get_size(), Err(CoreError::NotSupported { .. })));
    }

    #[test]
    fn access_controlled_label_refuses_maintenance() {
        let tmp = tempdir().unwrap();
        let db = Database::open_with_capability(props(tmp.path()), Arc::new(LockedDevice)).unwrap();
        assert_eq!(db.properties().security.label, SecurityLabel::S3);
        assert!(matches!(db.rekey(&pw("x")), Err(CoreError::NotSupported { .. })));
        assert!(matches!(
            db.export(&tmp.path().join("copy.db"), &CipherPassword::empty()),
            Err(CoreError::NotSupported { .. })
        ));
    }

    #[test]
    fn corruption_handler_is_installed() {
        let tmp = tempdir().unwrap();
        let db = Database::open(props(tmp.path())).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        db.set_corruption_handler(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!db.is_corrupted());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_requires_closed_store() {
        let tmp = tempdir().unwrap();
        let p = props(tmp.path());
        let db = Database::open(p.clone()).unwrap();
        assert!(matches!(Database::remove(&p), Err(CoreError::StoreLocked)));
        db.close().unwrap();
        Database::remove(&p).unwrap();
        assert!(!p.store_dir().exists());
    }
}
