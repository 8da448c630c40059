//! Options for opening a physical database.

use crate::password::CipherPassword;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time the engine waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// How to open one physical connection.
#[derive(Debug, Clone)]
pub struct OpenDbOptions {
    /// Database file, or `None` for a private in-memory database.
    pub path: Option<PathBuf>,
    /// Cipher password; empty for plaintext.
    pub password: CipherPassword,
    /// Create the file if it does not exist.
    pub create_if_missing: bool,
    /// Refuse writes at the SQL level. The file is still opened read-write
    /// so WAL sidecars can be shared with the writer.
    pub query_only: bool,
    /// Switch the file to WAL journaling on open (ignored for query-only and
    /// in-memory connections).
    pub wal: bool,
    /// How long statements wait on engine-level locks.
    pub busy_timeout: Duration,
}

impl OpenDbOptions {
    /// Options for a file-backed database.
    #[must_use]
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            password: CipherPassword::empty(),
            create_if_missing: true,
            query_only: false,
            wal: false,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Options for an in-memory database.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            path: None,
            password: CipherPassword::empty(),
            create_if_missing: true,
            query_only: false,
            wal: false,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Returns true for in-memory databases.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Sets the cipher password.
    #[must_use]
    pub fn password(mut self, password: CipherPassword) -> Self {
        self.password = password;
        self
    }

    /// Sets whether a missing file is created.
    #[must_use]
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets query-only access.
    #[must_use]
    pub fn query_only(mut self, query_only: bool) -> Self {
        self.query_only = query_only;
        self
    }

    /// Sets WAL journaling.
    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    /// Sets the engine-level lock wait.
    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}
