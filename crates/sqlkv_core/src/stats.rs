//! Store statistics.
//!
//! ```rust,ignore
//! let stats = db.stats();
//! println!("reads: {}, busy: {}", stats.reads, stats.busy_rejections);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one open store.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    scans: AtomicU64,
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    snapshots: AtomicU64,
    rekeys: AtomicU64,
    imports: AtomicU64,
    exports: AtomicU64,
    busy_rejections: AtomicU64,
    corruptions: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub(crate) fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl StoreStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_read, reads);
    counter!(record_delete, deletes);
    counter!(record_scan, scans);
    counter!(record_transaction_start, transactions_started);
    counter!(record_transaction_commit, transactions_committed);
    counter!(record_transaction_rollback, transactions_rolled_back);
    counter!(record_snapshot, snapshots);
    counter!(record_rekey, rekeys);
    counter!(record_import, imports);
    counter!(record_export, exports);
    counter!(record_busy, busy_rejections);
    counter!(record_corruption, corruptions);

    /// Records `count` written entries.
    pub(crate) fn record_writes(&self, count: usize) {
        self.writes.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            reads: load(&self.reads),
            writes: load(&self.writes),
            deletes: load(&self.deletes),
            scans: load(&self.scans),
            transactions_started: load(&self.transactions_started),
            transactions_committed: load(&self.transactions_committed),
            transactions_rolled_back: load(&self.transactions_rolled_back),
            snapshots: load(&self.snapshots),
            rekeys: load(&self.rekeys),
            imports: load(&self.imports),
            exports: load(&self.exports),
            busy_rejections: load(&self.busy_rejections),
            corruptions: load(&self.corruptions),
        }
    }
}

/// A plain copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Point lookups and snapshot reads.
    pub reads: u64,
    /// Entries written by put and put-batch.
    pub writes: u64,
    /// Delete and delete-batch calls.
    pub deletes: u64,
    /// Prefix scans.
    pub scans: u64,
    /// Transactions begun, implicit and explicit.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Snapshots created.
    pub snapshots: u64,
    /// Successful rekeys.
    pub rekeys: u64,
    /// Successful imports.
    pub imports: u64,
    /// Successful exports.
    pub exports: u64,
    /// Calls refused with `Busy`.
    pub busy_rejections: u64,
    /// Corrupted executors returned to the pool.
    pub corruptions: u64,
}
