//! Change feed for observing committed writes.
//!
//! Observers register a key prefix on a connection and receive one
//! [`ChangedData`] per commit that touched a matching key. Nothing is sent
//! for rolled-back work.
//!
//! ```rust,ignore
//! let (id, rx) = conn.register_observer(b"user/")?;
//! conn.put(b"user/1", b"alice")?;
//! let change = rx.recv()?;
//! assert_eq!(change.entries_put[0].key, b"user/1");
//! conn.unregister_observer(id)?;
//! ```

use crate::types::{ConnectionId, Entry, Key, ObserverId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Writes made by one committed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedData {
    /// True if the transaction cleared the store. Entries listed in
    /// `entries_put` were written after the clear.
    pub cleared: bool,
    /// Entries written, in call order.
    pub entries_put: Vec<Entry>,
    /// Keys removed, in call order.
    pub keys_deleted: Vec<Key>,
}

impl ChangedData {
    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.entries_put.is_empty() && self.keys_deleted.is_empty()
    }

    pub(crate) fn record_put(&mut self, entries: &[Entry]) {
        self.entries_put.extend_from_slice(entries);
    }

    pub(crate) fn record_delete(&mut self, keys: Vec<Key>) {
        self.keys_deleted.extend(keys);
    }

    pub(crate) fn record_clear(&mut self) {
        self.cleared = true;
        self.entries_put.clear();
        self.keys_deleted.clear();
    }

    fn filtered(&self, prefix: &[u8]) -> Self {
        Self {
            cleared: self.cleared,
            entries_put: self
                .entries_put
                .iter()
                .filter(|e| e.key.starts_with(prefix))
                .cloned()
                .collect(),
            keys_deleted: self
                .keys_deleted
                .iter()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
        }
    }
}

struct Subscriber {
    id: ObserverId,
    owner: ConnectionId,
    prefix: Key,
    sender: Sender<ChangedData>,
}

/// Distributes committed changes to prefix subscribers.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes `owner` to changes under `prefix`.
    pub(crate) fn subscribe(
        &self,
        owner: ConnectionId,
        prefix: &[u8],
    ) -> (ObserverId, Receiver<ChangedData>) {
        let (tx, rx) = mpsc::channel();
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            id,
            owner,
            prefix: prefix.to_vec(),
            sender: tx,
        });
        (id, rx)
    }

    /// Removes one subscription of `owner`. Returns false if unknown.
    pub(crate) fn unsubscribe(&self, owner: ConnectionId, id: ObserverId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| !(s.id == id && s.owner == owner));
        subscribers.len() != before
    }

    /// Removes every subscription of `owner`.
    pub(crate) fn unsubscribe_all(&self, owner: ConnectionId) {
        self.subscribers.write().retain(|s| s.owner != owner);
    }

    /// Number of live subscriptions held by `owner`.
    pub(crate) fn count_for(&self, owner: ConnectionId) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|s| s.owner == owner)
            .count()
    }

    /// Sends `changes` to every subscriber with a matching key.
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub(crate) fn emit(&self, changes: &ChangedData) {
        if changes.is_empty() {
            return;
        }
        self.subscribers.write().retain(|s| {
            let matching = changes.filtered(&s.prefix);
            if matching.is_empty() {
                return true;
            }
            s.sender.send(matching).is_ok()
        });
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
