//! Core type definitions and argument limits.

use crate::error::{CoreError, CoreResult};
use sqlkv_storage::CipherPassword;
use std::fmt;

/// Maximum key length in bytes.
pub const MAX_KEY_SIZE: usize = 1024;
/// Maximum value length in bytes.
pub const MAX_VALUE_SIZE: usize = 4 * 1024 * 1024;
/// Maximum number of entries or keys in one batch call.
pub const MAX_BATCH_SIZE: usize = 128;
/// Maximum cipher password length in bytes.
pub const MAX_PASSWORD_SIZE: usize = CipherPassword::MAX_SIZE;

/// A store key. Never empty.
pub type Key = Vec<u8>;
/// A stored value. May be empty.
pub type Value = Vec<u8>;

/// A key paired with its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entry {
    /// The key.
    pub key: Key,
    /// The value.
    pub value: Value,
}

impl Entry {
    /// Creates an entry.
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Identifier of a connection, unique within its database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Identifier of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap:{}", self.0)
    }
}

/// Identifier of a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs:{}", self.0)
    }
}

pub(crate) fn check_key(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_args("key is empty"));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(CoreError::invalid_args(format!(
            "key is {} bytes (max {MAX_KEY_SIZE})",
            key.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_value(value: &[u8]) -> CoreResult<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(CoreError::invalid_args(format!(
            "value is {} bytes (max {MAX_VALUE_SIZE})",
            value.len()
        )));
    }
    Ok(())
}

/// A prefix may be empty but is bounded like a key.
pub(crate) fn check_prefix(prefix: &[u8]) -> CoreResult<()> {
    if prefix.len() > MAX_KEY_SIZE {
        return Err(CoreError::invalid_args(format!(
            "prefix is {} bytes (max {MAX_KEY_SIZE})",
            prefix.len()
        )));
    }
    Ok(())
}

fn check_batch_len(len: usize) -> CoreResult<()> {
    if len == 0 {
        return Err(CoreError::invalid_args("batch is empty"));
    }
    if len > MAX_BATCH_SIZE {
        return Err(CoreError::invalid_args(format!(
            "batch has {len} items (max {MAX_BATCH_SIZE})"
        )));
    }
    Ok(())
}

pub(crate) fn check_entries(entries: &[Entry]) -> CoreResult<()> {
    check_batch_len(entries.len())?;
    for entry in entries {
        check_key(&entry.key)?;
        check_value(&entry.value)?;
    }
    Ok(())
}

pub(crate) fn check_keys(keys: &[Key]) -> CoreResult<()> {
    check_batch_len(keys.len())?;
    keys.iter().try_for_each(|key| check_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bounds() {
        assert!(check_key(b"").is_err());
        assert!(check_key(&[1; MAX_KEY_SIZE]).is_ok());
        assert!(check_key(&[1; MAX_KEY_SIZE + 1]).is_err());
    }

    #[test]
    fn empty_value_is_valid() {
        assert!(check_value(b"").is_ok());
        assert!(check_value(&vec![0; MAX_VALUE_SIZE + 1]).is_err());
    }

    #[test]
    fn prefix_may_be_empty() {
        assert!(check_prefix(b"").is_ok());
        assert!(check_prefix(&[1; MAX_KEY_SIZE + 1]).is_err());
    }

    #[test]
    fn batch_bounds() {
        assert!(check_entries(&[]).is_err());
        let full: Vec<Entry> = (0..MAX_BATCH_SIZE)
            .map(|i| Entry::new(vec![1, i as u8], vec![]))
            .collect();
        assert!(check_entries(&full).is_ok());

        let keys: Vec<Key> = (0..=MAX_BATCH_SIZE).map(|i| vec![i as u8 + 1]).collect();
        assert!(check_keys(&keys).is_err());
        assert!(check_keys(&[b"k".to_vec(), Vec::new()]).is_err());
    }

    #[test]
    fn id_display() {
        assert_eq!(ConnectionId(3).to_string(), "conn:3");
        assert_eq!(SnapshotId(4).to_string(), "snap:4");
        assert_eq!(ObserverId(5).to_string(), "obs:5");
    }
}
