//! Implicit and explicit transactions.

use crate::change_feed::ChangedData;
use crate::database::Database;
use crate::engine::{ExecutorGuard, Permission};
use crate::error::{CoreError, CoreResult};
use crate::executor::{Executor, TransactType};
use tracing::{debug, warn};

/// An open transaction holding its executor.
pub(crate) struct ActiveTransaction {
    executor: ExecutorGuard,
    changes: ChangedData,
    entry_count: usize,
}

impl ActiveTransaction {
    /// Checks out an executor and begins a transaction on it.
    ///
    /// `Immediate` takes the write executor, `Deferred` a read executor.
    pub(crate) fn begin(db: &Database, kind: TransactType) -> CoreResult<Self> {
        let writable = kind == TransactType::Immediate;
        let mut executor = db.engine().find_executor(writable, Permission::Normal)?;
        executor.start_transaction(kind)?;
        db.stats_ref().record_transaction_start();
        Ok(Self {
            executor,
            changes: ChangedData::default(),
            entry_count: 0,
        })
    }

    pub(crate) fn executor(&mut self) -> &mut Executor {
        &mut self.executor
    }

    /// Commits and publishes the recorded changes.
    ///
    /// The executor goes back to the pool either way.
    pub(crate) fn commit(mut self, db: &Database) -> CoreResult<()> {
        self.executor.commit()?;
        db.stats_ref().record_transaction_commit();
        debug!(entries = self.entry_count, "transaction committed");
        db.feed().emit(&self.changes);
        Ok(())
    }

    /// Rolls back and returns the executor.
    pub(crate) fn rollback(mut self, db: &Database) -> CoreResult<()> {
        let result = self.executor.rollback();
        db.stats_ref().record_transaction_rollback();
        debug!(entries = self.entry_count, "transaction rolled back");
        result
    }
}

/// A transaction seen by one call: either begun for that call alone or
/// borrowed from an explicit transaction on the connection.
///
/// Only [`Transaction::Owned`] commits or rolls back in
/// [`Transaction::finish`]; a borrowed one is left open for the caller.
pub(crate) enum Transaction<'a> {
    Owned(ActiveTransaction),
    Borrowed(&'a mut ActiveTransaction),
}

impl Transaction<'_> {
    fn active(&mut self) -> &mut ActiveTransaction {
        match self {
            Self::Owned(active) => active,
            Self::Borrowed(active) => &mut **active,
        }
    }

    pub(crate) fn executor(&mut self) -> &mut Executor {
        self.active().executor()
    }

    /// Checks there is room for `count` more written entries.
    ///
    /// # Errors
    ///
    /// `MaxLimits` if an explicit transaction would exceed `limit`.
    pub(crate) fn check_room(&mut self, count: usize, limit: usize) -> CoreResult<()> {
        let explicit = matches!(self, Self::Borrowed(_));
        let held = self.active().entry_count;
        if explicit && held + count > limit {
            return Err(CoreError::max_limits(format!(
                "transaction holds {held} entries, adding {count} exceeds {limit}"
            )));
        }
        Ok(())
    }

    /// Counts `count` entries written by a successful call.
    pub(crate) fn add_entries(&mut self, count: usize) {
        self.active().entry_count += count;
    }

    /// The executor and, when someone listens, the change record.
    pub(crate) fn parts(&mut self, observed: bool) -> (&mut Executor, Option<&mut ChangedData>) {
        let active = self.active();
        let changes = if observed {
            Some(&mut active.changes)
        } else {
            None
        };
        (&mut *active.executor, changes)
    }

    /// Ends an owned transaction according to `result`.
    ///
    /// Success commits; failure rolls back and returns the original error.
    pub(crate) fn finish<T>(self, result: CoreResult<T>, db: &Database) -> CoreResult<T> {
        let active = match self {
            Self::Borrowed(_) => return result,
            Self::Owned(active) => active,
        };
        match result {
            Ok(value) => {
                active.commit(db)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = active.rollback(db) {
                    warn!(error = %rollback, "implicit rollback failed");
                }
                Err(err)
            }
        }
    }
}
