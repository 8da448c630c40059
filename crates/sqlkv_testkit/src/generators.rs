//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that stays within the store's argument limits.

use proptest::prelude::*;
use sqlkv_core::{CipherPassword, Entry, Key, MAX_BATCH_SIZE, MAX_PASSWORD_SIZE};
use std::collections::BTreeMap;

/// Strategy for generating valid keys (1..=64 arbitrary bytes).
///
/// Real keys may be up to `MAX_KEY_SIZE`; short keys make collisions and
/// shared prefixes likely, which is what the tests want.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop::collection::vec(any::<u8>(), 1..=64)
}

/// Strategy for keys drawn from a small alphabet under a fixed prefix.
pub fn prefixed_key_strategy(prefix: &'static [u8]) -> impl Strategy<Value = Key> + Clone {
    prop::collection::vec(prop::sample::select(b"abc/".to_vec()), 0..8).prop_map(move |tail| {
        let mut key = prefix.to_vec();
        key.extend(tail);
        key
    })
}

/// Strategy for generating values, empty included.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

/// Strategy for generating a single entry.
pub fn entry_strategy() -> impl Strategy<Value = Entry> {
    (key_strategy(), value_strategy()).prop_map(|(key, value)| Entry::new(key, value))
}

/// Strategy for a batch of entries with distinct keys.
pub fn batch_strategy() -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 1..=MAX_BATCH_SIZE)
        .prop_map(|map| map.into_iter().map(|(k, v)| Entry::new(k, v)).collect())
}

/// Strategy for non-empty passwords within the size limit.
pub fn password_strategy() -> impl Strategy<Value = CipherPassword> {
    prop::collection::vec(any::<u8>(), 1..=MAX_PASSWORD_SIZE)
        .prop_map(|bytes| CipherPassword::new(bytes).expect("Password within limit"))
}

/// A single operation against a connection.
#[derive(Debug, Clone)]
pub enum KvOp {
    /// Put one entry.
    Put(Key, Vec<u8>),
    /// Delete one key.
    Delete(Key),
    /// Put a batch.
    PutBatch(Vec<Entry>),
    /// Clear the store.
    Clear,
}

impl KvOp {
    /// Applies the operation to an ordered model of the store.
    ///
    /// Returns false where the store reports `NotFound` (delete of a
    /// missing key).
    pub fn apply_to_model(&self, model: &mut BTreeMap<Key, Vec<u8>>) -> bool {
        match self {
            Self::Put(key, value) => {
                model.insert(key.clone(), value.clone());
                true
            }
            Self::Delete(key) => model.remove(key).is_some(),
            Self::PutBatch(entries) => {
                for entry in entries {
                    model.insert(entry.key.clone(), entry.value.clone());
                }
                true
            }
            Self::Clear => {
                model.clear();
                true
            }
        }
    }
}

/// Strategy for generating operations over a shared key space.
pub fn kv_op_strategy() -> impl Strategy<Value = KvOp> {
    let key = prefixed_key_strategy(b"k/");
    prop_oneof![
        6 => (key.clone(), value_strategy()).prop_map(|(k, v)| KvOp::Put(k, v)),
        3 => key.clone().prop_map(KvOp::Delete),
        2 => prop::collection::btree_map(key, value_strategy(), 1..8)
            .prop_map(|map| KvOp::PutBatch(map.into_iter().map(|(k, v)| Entry::new(k, v)).collect())),
        1 => Just(KvOp::Clear),
    ]
}

/// Strategy for a sequence of operations.
pub fn kv_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<KvOp>> {
    prop::collection::vec(kv_op_strategy(), 1..max_len)
}
