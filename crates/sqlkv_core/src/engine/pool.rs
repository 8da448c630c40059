//! The engine and its pool bookkeeping.

use super::guard::{EnginePermit, ExecutorGuard};
use super::{EngineState, Permission};
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::executor::Executor;
use crate::properties::{SecurityCapability, StoreProperties};
use crate::stats::StoreStats;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use sqlkv_storage::{CipherPassword, OpenDbOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Callback invoked when a corrupted executor comes back to the pool.
pub type CorruptionHandler = Arc<dyn Fn() + Send + Sync>;

/// Which pool slot a checkout came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Writer,
    Reader,
}

struct Pool {
    state: EngineState,
    permission: Permission,
    idle_writer: Option<Executor>,
    writer_out: bool,
    idle_readers: Vec<Executor>,
    /// Read executors alive, idle or checked out.
    readers_open: usize,
    readers_out: usize,
}

impl Pool {
    fn checked_out(&self) -> usize {
        usize::from(self.writer_out) + self.readers_out
    }
}

/// Owns and arbitrates the executors of one open store.
pub struct Engine {
    label: String,
    config: EngineConfig,
    path: Option<PathBuf>,
    properties: RwLock<StoreProperties>,
    pool: Mutex<Pool>,
    available: Condvar,
    stats: Arc<StoreStats>,
    corruption_handler: RwLock<Option<CorruptionHandler>>,
    corrupted: AtomicBool,
}

impl Engine {
    /// Validates the pool sizes, opens the write executor and creates the
    /// tables.
    ///
    /// `path` is the live database file, `None` for an in-memory store. In
    /// memory mode the read pool is empty and reads share the writer.
    ///
    /// # Errors
    ///
    /// `InvalidArgs` for bad pool sizes, otherwise the open error.
    pub fn init(
        properties: StoreProperties,
        path: Option<PathBuf>,
        stats: Arc<StoreStats>,
    ) -> CoreResult<Arc<Self>> {
        let mut config = properties.engine.clone();
        config.validate()?;
        if path.is_none() {
            if config.max_write_executors == 0 {
                return Err(CoreError::invalid_args("in-memory store needs a write executor"));
            }
            config.max_read_executors = 0;
        }

        let engine = Arc::new(Self {
            label: properties.store_id.clone(),
            config,
            path,
            properties: RwLock::new(properties),
            pool: Mutex::new(Pool {
                state: EngineState::Invalid,
                permission: Permission::Normal,
                idle_writer: None,
                writer_out: false,
                idle_readers: Vec::new(),
                readers_open: 0,
                readers_out: 0,
            }),
            available: Condvar::new(),
            stats,
            corruption_handler: RwLock::new(None),
            corrupted: AtomicBool::new(false),
        });

        {
            let password = engine.properties.read().password.clone();
            let mut pool = engine.pool.lock();
            engine.open_executors(&mut pool, &password)?;
        }

        info!(
            store = %engine.label,
            readers = engine.config.max_read_executors,
            writable = engine.config.max_write_executors == 1,
            "engine initialized"
        );
        Ok(engine)
    }

    /// Hands out an executor.
    ///
    /// Writes always get the write executor; reads get a read executor, or
    /// the writer when the read pool is empty. Blocks up to the acquire
    /// timeout when the pool is exhausted.
    ///
    /// # Errors
    ///
    /// - `Busy` if a monopolize token other than `permission` is held, or
    ///   nothing became available in time
    /// - `InvalidDb` if the engine has no open executors
    /// - `ReadOnly` for a write on an engine without a writer
    pub fn find_executor(
        self: &Arc<Self>,
        writable: bool,
        permission: Permission,
    ) -> CoreResult<ExecutorGuard> {
        let use_writer = writable || self.config.max_read_executors == 0;
        if use_writer && self.config.max_write_executors == 0 {
            return Err(CoreError::ReadOnly);
        }

        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut pool = self.pool.lock();
        loop {
            if pool.permission != Permission::Normal && pool.permission != permission {
                self.stats.record_busy();
                return Err(CoreError::busy(format!(
                    "store is held by {:?}",
                    pool.permission
                )));
            }
            if pool.state == EngineState::Invalid {
                return Err(CoreError::invalid_db("engine has no open executors"));
            }

            if use_writer {
                if let Some(executor) = pool.idle_writer.take() {
                    pool.writer_out = true;
                    return Ok(ExecutorGuard::new(Arc::clone(self), executor, Slot::Writer));
                }
            } else {
                if let Some(executor) = pool.idle_readers.pop() {
                    pool.readers_out += 1;
                    return Ok(ExecutorGuard::new(Arc::clone(self), executor, Slot::Reader));
                }
                if pool.readers_open < self.config.max_read_executors {
                    // Reserve the slot, then open without holding the lock.
                    pool.readers_open += 1;
                    pool.readers_out += 1;
                    let options = self.open_options(false, &self.properties.read().password);
                    let opened = MutexGuard::unlocked(&mut pool, || Executor::open(&options, false));
                    return match opened {
                        Ok(executor) => {
                            debug!(store = %self.label, open = pool.readers_open, "read executor created");
                            Ok(ExecutorGuard::new(Arc::clone(self), executor, Slot::Reader))
                        }
                        Err(err) => {
                            pool.readers_open -= 1;
                            pool.readers_out -= 1;
                            self.available.notify_all();
                            Err(err)
                        }
                    };
                }
            }

            if self.available.wait_until(&mut pool, deadline).timed_out() {
                self.stats.record_busy();
                return Err(CoreError::busy(if use_writer {
                    "write executor is in use"
                } else {
                    "read executors are exhausted"
                }));
            }
        }
    }

    /// Returns an executor to the pool.
    pub(crate) fn recycle(&self, mut executor: Executor, slot: Slot) {
        if !executor.is_autocommit() {
            if let Err(err) = executor.rollback() {
                warn!(store = %self.label, error = %err, "rollback on recycle failed");
            }
        }
        let corrupted = executor.is_corrupted();

        {
            let mut pool = self.pool.lock();
            match slot {
                Slot::Writer => pool.writer_out = false,
                Slot::Reader => pool.readers_out -= 1,
            }
            if pool.state == EngineState::Invalid {
                if slot == Slot::Reader {
                    pool.readers_open -= 1;
                }
                drop(executor);
            } else {
                match slot {
                    Slot::Writer => pool.idle_writer = Some(executor),
                    Slot::Reader => pool.idle_readers.push(executor),
                }
            }
            self.available.notify_all();
        }

        if corrupted {
            self.notify_corruption();
        }
    }

    /// Acquires a monopolize token.
    ///
    /// Once the token is set no new checkouts are handed to others. The call
    /// then needs every checked-out executor back: without `auto_retry` it
    /// fails at once, with it it waits up to the drain timeout. On failure
    /// the token is reverted.
    ///
    /// # Errors
    ///
    /// `Busy` if another token is held or executors stay checked out.
    pub fn try_to_disable(&self, auto_retry: bool, token: Permission) -> CoreResult<EnginePermit<'_>> {
        if token == Permission::Normal {
            return Err(CoreError::invalid_args("Normal is not a monopolize token"));
        }

        let mut pool = self.pool.lock();
        if pool.permission != Permission::Normal {
            self.stats.record_busy();
            return Err(CoreError::busy(format!(
                "store is already held by {:?}",
                pool.permission
            )));
        }
        pool.permission = token;
        // Waiting checkouts must see the token instead of their deadline.
        self.available.notify_all();

        let wait = if auto_retry {
            self.config.drain_timeout
        } else {
            Duration::ZERO
        };
        let deadline = Instant::now() + wait;
        while pool.checked_out() > 0 {
            if !auto_retry || self.available.wait_until(&mut pool, deadline).timed_out() {
                if pool.checked_out() == 0 {
                    break;
                }
                let in_use = pool.checked_out();
                pool.permission = Permission::Normal;
                self.available.notify_all();
                self.stats.record_busy();
                return Err(CoreError::busy(format!("{in_use} executor(s) still in use")));
            }
        }

        debug!(store = %self.label, ?token, "engine disabled");
        Ok(EnginePermit::new(self, token))
    }

    /// Releases a monopolize token. A token that is not held is ignored.
    pub fn enable(&self, token: Permission) {
        let mut pool = self.pool.lock();
        if pool.permission == token && token != Permission::Normal {
            pool.permission = Permission::Normal;
            self.available.notify_all();
            debug!(store = %self.label, ?token, "engine enabled");
        }
    }

    /// Closes every executor so the file can be replaced.
    ///
    /// Requires the permit; the engine stays `Invalid` until
    /// [`Engine::reinit`].
    pub fn release(&self, permit: &EnginePermit<'_>) -> CoreResult<()> {
        let mut pool = self.pool.lock();
        if pool.permission != permit.token() {
            return Err(CoreError::invalid_args("permit does not match the held token"));
        }
        self.shutdown(&mut pool)
    }

    /// Reopens the executors with `password`.
    ///
    /// The recorded password only changes once the new executors opened.
    pub fn reinit(&self, permit: &EnginePermit<'_>, password: &CipherPassword) -> CoreResult<()> {
        let mut pool = self.pool.lock();
        if pool.permission != permit.token() {
            return Err(CoreError::invalid_args("permit does not match the held token"));
        }
        if pool.state != EngineState::Invalid {
            return Err(CoreError::invalid_db("engine is still open"));
        }
        self.open_executors(&mut pool, password)?;
        self.properties.write().password = password.clone();
        info!(store = %self.label, "engine reinitialized");
        Ok(())
    }

    /// Closes every executor for good.
    ///
    /// # Errors
    ///
    /// `Busy` while executors are checked out.
    pub fn close(&self) -> CoreResult<()> {
        let mut pool = self.pool.lock();
        if pool.state == EngineState::Invalid {
            return Ok(());
        }
        self.shutdown(&mut pool)?;
        info!(store = %self.label, "engine closed");
        Ok(())
    }

    /// Compares a candidate open of the same store against the live one.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch` for a different non-empty schema
    /// - `InvalidArgs` for a different security option, conflict policy or
    ///   memory flag
    /// - `InvalidPasswordOrCorrupted` for a different password
    pub fn check_engine_option(
        &self,
        candidate: &StoreProperties,
        capability: &dyn SecurityCapability,
    ) -> CoreResult<()> {
        let live = self.properties.read();

        if !candidate.schema.is_empty() && candidate.schema != live.schema {
            return Err(CoreError::SchemaMismatch {
                stored: live.schema.clone(),
                requested: candidate.schema.clone(),
            });
        }

        let requested = match (&self.path, candidate.security.is_unset()) {
            (Some(path), true) => capability.security_option(path)?,
            _ => candidate.security,
        };
        if requested != live.security {
            return Err(CoreError::invalid_args(format!(
                "security option {requested:?} differs from open store {:?}",
                live.security
            )));
        }
        if candidate.conflict_policy != live.conflict_policy {
            return Err(CoreError::invalid_args(format!(
                "conflict policy {:?} differs from open store {:?}",
                candidate.conflict_policy, live.conflict_policy
            )));
        }
        if candidate.memory != live.memory {
            return Err(CoreError::invalid_args("memory mode differs from open store"));
        }
        if candidate.password != live.password {
            return Err(CoreError::InvalidPasswordOrCorrupted);
        }
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.pool.lock().state
    }

    /// Currently held token.
    #[must_use]
    pub fn permission(&self) -> Permission {
        self.pool.lock().permission
    }

    /// Number of executors currently checked out.
    #[must_use]
    pub fn checked_out(&self) -> usize {
        self.pool.lock().checked_out()
    }

    /// Effective pool configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Live database file, `None` in memory mode.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the live store properties.
    #[must_use]
    pub fn properties(&self) -> StoreProperties {
        self.properties.read().clone()
    }

    /// Recorded password.
    #[must_use]
    pub fn password(&self) -> CipherPassword {
        self.properties.read().password.clone()
    }

    /// Returns true once any executor reported corruption.
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        self.corrupted.load(Ordering::Acquire)
    }

    /// Records the schema found in the store's metadata.
    pub(crate) fn adopt_schema(&self, schema: String) {
        self.properties.write().schema = schema;
    }

    /// Installs the corruption callback.
    pub fn set_corruption_handler(&self, handler: Option<CorruptionHandler>) {
        *self.corruption_handler.write() = handler;
    }

    /// Connection options for a raw connection to the live file.
    pub(crate) fn raw_options(&self, password: &CipherPassword) -> Option<OpenDbOptions> {
        self.path.as_ref().map(|path| {
            OpenDbOptions::file(path)
                .password(password.clone())
                .create_if_missing(false)
                .busy_timeout(self.config.busy_timeout)
        })
    }

    fn open_options(&self, writable: bool, password: &CipherPassword) -> OpenDbOptions {
        let base = match &self.path {
            Some(path) => OpenDbOptions::file(path),
            None => OpenDbOptions::memory(),
        };
        base.password(password.clone())
            .busy_timeout(self.config.busy_timeout)
            .create_if_missing(writable)
            .wal(writable)
            .query_only(!writable)
    }

    fn open_executors(&self, pool: &mut Pool, password: &CipherPassword) -> CoreResult<()> {
        if self.config.max_write_executors == 1 {
            let mut writer = Executor::open(&self.open_options(true, password), true)?;
            writer.create_tables()?;
            pool.idle_writer = Some(writer);
        } else {
            // Read-only engine: open one reader eagerly so a bad key fails here.
            let reader = Executor::open(&self.open_options(false, password), false)?;
            pool.idle_readers.push(reader);
            pool.readers_open = 1;
        }
        pool.state = EngineState::MainDb;
        Ok(())
    }

    fn shutdown(&self, pool: &mut Pool) -> CoreResult<()> {
        if pool.checked_out() > 0 {
            self.stats.record_busy();
            return Err(CoreError::busy(format!(
                "{} executor(s) still in use",
                pool.checked_out()
            )));
        }
        // Readers go first so the writer's close can fold the log.
        pool.idle_readers.clear();
        pool.readers_open = 0;
        if let Some(mut writer) = pool.idle_writer.take() {
            if let Err(err) = writer.checkpoint() {
                warn!(store = %self.label, error = %err, "checkpoint before close failed");
            }
        }
        pool.state = EngineState::Invalid;
        self.available.notify_all();
        debug!(store = %self.label, "executors released");
        Ok(())
    }

    fn notify_corruption(&self) {
        self.corrupted.store(true, Ordering::Release);
        self.stats.record_corruption();
        warn!(store = %self.label, "corrupted executor returned to pool");
        let handler = self.corruption_handler.read().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}
