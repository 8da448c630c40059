//! Scoped checkouts from the engine.

use super::pool::{Engine, Slot};
use super::Permission;
use crate::executor::Executor;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// An executor checked out of the pool.
///
/// Dropping the guard recycles the executor: an open transaction is rolled
/// back and a corrupted executor triggers the store's corruption handler.
pub struct ExecutorGuard {
    engine: Arc<Engine>,
    executor: Option<Executor>,
    slot: Slot,
}

impl ExecutorGuard {
    pub(super) fn new(engine: Arc<Engine>, executor: Executor, slot: Slot) -> Self {
        Self {
            engine,
            executor: Some(executor),
            slot,
        }
    }

    /// Returns true if this checkout holds the write executor.
    #[must_use]
    pub fn holds_writer(&self) -> bool {
        self.slot == Slot::Writer
    }
}

impl Deref for ExecutorGuard {
    type Target = Executor;

    fn deref(&self) -> &Executor {
        match &self.executor {
            Some(executor) => executor,
            // Only `drop` empties the slot.
            None => unreachable!("executor already recycled"),
        }
    }
}

impl DerefMut for ExecutorGuard {
    fn deref_mut(&mut self) -> &mut Executor {
        match &mut self.executor {
            Some(executor) => executor,
            None => unreachable!("executor already recycled"),
        }
    }
}

impl Drop for ExecutorGuard {
    fn drop(&mut self) {
        if let Some(executor) = self.executor.take() {
            self.engine.recycle(executor, self.slot);
        }
    }
}

impl fmt::Debug for ExecutorGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorGuard")
            .field("slot", &self.slot)
            .finish()
    }
}

/// Proof that the engine's monopolize token is held.
///
/// Dropping the permit calls [`Engine::enable`] with the same token.
#[must_use = "the token is released as soon as the permit is dropped"]
pub struct EnginePermit<'a> {
    engine: &'a Engine,
    token: Permission,
}

impl<'a> EnginePermit<'a> {
    pub(super) fn new(engine: &'a Engine, token: Permission) -> Self {
        Self { engine, token }
    }

    /// The held token.
    #[must_use]
    pub fn token(&self) -> Permission {
        self.token
    }
}

impl Drop for EnginePermit<'_> {
    fn drop(&mut self) {
        self.engine.enable(self.token);
    }
}

impl fmt::Debug for EnginePermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnginePermit")
            .field("token", &self.token)
            .finish()
    }
}
