//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Upper bound on read executors per engine.
pub const MAX_READ_EXECUTORS: usize = 32;

/// Sizing and timing of one engine's executor pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of write executors: 0 for a read-only engine, otherwise 1.
    pub max_write_executors: usize,

    /// Number of read executors, created lazily. With 0, reads share the
    /// write executor.
    pub max_read_executors: usize,

    /// How long a checkout blocks on an exhausted pool before `Busy`.
    pub acquire_timeout: Duration,

    /// How long an auto-retrying exclusive acquisition waits for
    /// checked-out executors to come back.
    pub drain_timeout: Duration,

    /// How long statements wait on engine-level file locks.
    pub busy_timeout: Duration,

    /// Maximum entries written by one explicit transaction.
    pub transaction_entry_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_write_executors: 1,
            max_read_executors: 4,
            acquire_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_millis(50),
            busy_timeout: Duration::from_secs(2),
            transaction_entry_limit: 128,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of write executors.
    #[must_use]
    pub const fn max_write_executors(mut self, count: usize) -> Self {
        self.max_write_executors = count;
        self
    }

    /// Sets the number of read executors.
    #[must_use]
    pub const fn max_read_executors(mut self, count: usize) -> Self {
        self.max_read_executors = count;
        self
    }

    /// Sets the checkout timeout.
    #[must_use]
    pub const fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the drain timeout for exclusive acquisition.
    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the engine-level lock wait.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the explicit transaction entry limit.
    #[must_use]
    pub const fn transaction_entry_limit(mut self, limit: usize) -> Self {
        self.transaction_entry_limit = limit;
        self
    }

    /// Checks the pool sizes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgs` for more than one writer, more than
    /// [`MAX_READ_EXECUTORS`] readers, or an empty pool.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_write_executors > 1 {
            return Err(CoreError::invalid_args(format!(
                "at most one write executor allowed, got {}",
                self.max_write_executors
            )));
        }
        if self.max_read_executors > MAX_READ_EXECUTORS {
            return Err(CoreError::invalid_args(format!(
                "at most {MAX_READ_EXECUTORS} read executors allowed, got {}",
                self.max_read_executors
            )));
        }
        if self.max_write_executors + self.max_read_executors == 0 {
            return Err(CoreError::invalid_args("executor pool is empty"));
        }
        if self.transaction_entry_limit == 0 {
            return Err(CoreError::invalid_args("transaction entry limit is zero"));
        }
        Ok(())
    }
}
