//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use sqlkv_core::{Database, Entry, StoreProperties};
use std::sync::Arc;
use tempfile::TempDir;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Key `bench/<index:08>`.
pub fn key(index: usize) -> Vec<u8> {
    format!("bench/{index:08}").into_bytes()
}

/// Generate `count` entries with random payloads of `payload_size` bytes.
pub fn generate_entries(count: usize, payload_size: usize) -> Vec<Entry> {
    (0..count)
        .map(|i| Entry::new(key(i), random_data(payload_size)))
        .collect()
}

/// Opens a file-backed store in a fresh temporary directory.
///
/// Keep the directory alive for as long as the store is used.
pub fn file_store(password: &str) -> (TempDir, Arc<Database>) {
    let dir = TempDir::new().unwrap();
    let props = StoreProperties::new(dir.path(), "bench")
        .password(password.try_into().unwrap());
    let db = Database::open(props).unwrap();
    (dir, db)
}
