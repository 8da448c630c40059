//! Stress tests for sqlkv.
//!
//! These helpers drive a store under heavy load and concurrent access.

use crate::fixtures::indexed_key;
use rand::Rng;
use sqlkv_core::{CipherPassword, CoreError, Database, Entry};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Operations refused with `Busy`.
    pub busy_ops: usize,
    /// Operations that failed with any other error.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, busy: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + busy + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            busy_ops: busy,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Busy: {}", self.busy_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            value_size: 256,
            key_count: 500,
        }
    }
}

#[derive(Default)]
struct Counters {
    ok: AtomicUsize,
    busy: AtomicUsize,
    failed: AtomicUsize,
}

impl Counters {
    fn record<T>(&self, result: Result<T, CoreError>) {
        match result {
            Ok(_) | Err(CoreError::NotFound) => self.ok.fetch_add(1, Ordering::Relaxed),
            Err(err) if err.is_busy() => self.busy.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn finish(&self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.ok.load(Ordering::Relaxed),
            self.busy.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Writes `key_count` entries in batches so readers have something to find.
pub fn populate(db: &Arc<Database>, config: &StressConfig) {
    let conn = db.new_connection().expect("Failed to open connection");
    let value = vec![0xABu8; config.value_size];
    let entries: Vec<Entry> = (0..config.key_count)
        .map(|i| Entry::new(indexed_key("stress/", i), value.clone()))
        .collect();
    for chunk in entries.chunks(sqlkv_core::MAX_BATCH_SIZE) {
        conn.put_batch(chunk).expect("Failed to populate");
    }
}

/// Run a sequential write stress test on one connection.
pub fn stress_sequential_writes(db: &Arc<Database>, config: &StressConfig) -> StressTestResult {
    let conn = db.new_connection().expect("Failed to open connection");
    let value = vec![0xABu8; config.value_size];
    let counters = Counters::default();

    let start = Instant::now();
    for i in 0..config.operations {
        counters.record(conn.put(&indexed_key("stress/", i % config.key_count), &value));
    }
    counters.finish(start)
}

/// Run concurrent readers and writers, each thread on its own connection.
///
/// Even-numbered threads write, odd-numbered threads read random keys.
pub fn stress_concurrent_mixed(db: &Arc<Database>, config: &StressConfig) -> StressTestResult {
    populate(db, config);
    let counters = Arc::new(Counters::default());
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(db);
            let counters = Arc::clone(&counters);
            let config = config.clone();
            thread::spawn(move || {
                let conn = db.new_connection().expect("Failed to open connection");
                let mut rng = rand::thread_rng();
                let value = vec![t as u8; config.value_size];
                for _ in 0..config.operations {
                    let key = indexed_key("stress/", rng.gen_range(0..config.key_count));
                    if t % 2 == 0 {
                        counters.record(conn.put(&key, &value));
                    } else {
                        counters.record(conn.get(&key));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress thread panicked");
    }
    counters.finish(start)
}

/// Run readers while another thread repeatedly rekeys the store.
///
/// Readers may see `Busy` while a rekey holds the store but must never see
/// any other error or a wrong value. Returns the reader result and the
/// number of completed rekeys.
pub fn stress_reads_during_rekey(
    db: &Arc<Database>,
    config: &StressConfig,
    rekeys: usize,
) -> (StressTestResult, usize) {
    populate(db, config);
    let expected = vec![0xABu8; config.value_size];
    let counters = Arc::new(Counters::default());
    let stop = Arc::new(AtomicBool::new(false));
    let start = Instant::now();

    let readers: Vec<_> = (0..config.threads)
        .map(|_| {
            let db = Arc::clone(db);
            let counters = Arc::clone(&counters);
            let stop = Arc::clone(&stop);
            let expected = expected.clone();
            let key_count = config.key_count;
            thread::spawn(move || {
                let conn = db.new_connection().expect("Failed to open connection");
                let mut rng = rand::thread_rng();
                while !stop.load(Ordering::Relaxed) {
                    let key = indexed_key("stress/", rng.gen_range(0..key_count));
                    let result = conn.get(&key);
                    if let Ok(value) = &result {
                        assert_eq!(value, &expected, "Reader saw a wrong value");
                    }
                    counters.record(result);
                }
            })
        })
        .collect();

    let admin = db.new_connection().expect("Failed to open connection");
    let mut completed = 0;
    for round in 0..rekeys {
        let password = CipherPassword::try_from(format!("round-{round}").as_str())
            .expect("Valid password");
        // Readers hold executors between calls only briefly; retry on Busy.
        for _ in 0..50 {
            match admin.rekey(&password) {
                Ok(()) => {
                    completed += 1;
                    break;
                }
                Err(err) if err.is_busy() => thread::sleep(Duration::from_millis(5)),
                Err(err) => panic!("Rekey failed: {err}"),
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    for handle in readers {
        handle.join().expect("Reader thread panicked");
    }
    (counters.finish(start), completed)
}
