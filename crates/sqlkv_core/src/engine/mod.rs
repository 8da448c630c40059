//! Executor pool for one open store.
//!
//! The engine owns at most one write executor and a bounded set of lazily
//! created read executors. Executors leave the pool inside an
//! [`ExecutorGuard`] whose drop always returns them, so no exit path can
//! leak a checkout.
//!
//! Exclusive maintenance goes through a single permission token:
//! - `Normal`: executors are handed to anyone
//! - `RekeyExclusive` / `ImportExclusive`: new checkouts fail with `Busy`
//!
//! The token is taken with [`Engine::try_to_disable`], which returns an
//! [`EnginePermit`] that restores `Normal` when dropped.

mod guard;
mod pool;

pub use guard::{EnginePermit, ExecutorGuard};
pub use pool::Engine;

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Executors are open against the main database file.
    MainDb,
    /// Executors are open against a cache database. Maintenance is not
    /// available in this state.
    CacheDb,
    /// No executors are open; the engine must be initialized first.
    Invalid,
}

/// Engine-wide monopolize token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Executors are handed out normally.
    Normal,
    /// A rekey holds the engine.
    RekeyExclusive,
    /// An import holds the engine.
    ImportExclusive,
}
