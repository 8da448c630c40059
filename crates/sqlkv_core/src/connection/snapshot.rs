//! Point-in-time read views.

use super::{Connection, ConnectionState};
use crate::error::CoreResult;
use crate::types::{ConnectionId, Entry, SnapshotId, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A read-only view of the store as it was when the snapshot was taken.
///
/// Backed by a dedicated connection whose read transaction stays open for
/// the snapshot's lifetime. Dropping the snapshot releases it.
pub struct Snapshot {
    id: SnapshotId,
    owner: Arc<ConnectionState>,
    view: Connection,
}

impl Snapshot {
    pub(super) fn new(id: SnapshotId, owner: Arc<ConnectionState>, view: Connection) -> Self {
        Self { id, owner, view }
    }

    /// Returns the snapshot ID.
    #[must_use]
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Returns the connection the snapshot was taken from.
    #[must_use]
    pub fn owner_id(&self) -> ConnectionId {
        self.owner.id
    }

    /// Point lookup in the view.
    pub fn get(&self, key: &[u8]) -> CoreResult<Value> {
        self.view.get(key)
    }

    /// Prefix scan in the view. Same contract as
    /// [`Connection::get_entries`].
    pub fn get_entries(&self, prefix: &[u8]) -> CoreResult<Vec<Entry>> {
        self.view.get_entries(prefix)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.owner.snapshots.lock().remove(&self.id);
        debug!(conn = %self.owner.id, snapshot = %self.id, "snapshot released");
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.id)
            .field("owner", &self.owner.id)
            .finish()
    }
}
