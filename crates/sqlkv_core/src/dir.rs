//! Store directory management.
//!
//! This module handles the file system layout of one store:
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK                # Advisory lock held by the open handle
//! ├─ main.db             # Live database (+ main.db-wal, main.db-shm)
//! ├─ main.db.temp        # Scratch copy built by rekey/import
//! ├─ main.db-rekey-bak   # Previous live file while a rekey swap is pending
//! ├─ main.db-import-bak  # Previous live file while an import swap is pending
//! └─ main.db-<kind>-done # Marker: the swap's replacement is the live file
//! ```
//!
//! The LOCK file ensures only one handle serves a store at a time. The
//! `*.temp`, `*-bak` and `*-done` files exist only while maintenance is
//! running.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use sqlkv_storage::files;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const MAIN_DB_FILE: &str = "main.db";
const TEMP_SUFFIX: &str = ".temp";

/// Which maintenance operation a backup belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    /// Re-encryption with a new password.
    Rekey,
    /// Replacement of the contents from an external file.
    Import,
}

impl SwapKind {
    fn backup_suffix(self) -> &'static str {
        match self {
            Self::Rekey => "-rekey-bak",
            Self::Import => "-import-bak",
        }
    }

    fn marker_suffix(self) -> &'static str {
        match self {
            Self::Rekey => "-rekey-done",
            Self::Import => "-import-done",
        }
    }

    /// All kinds, in recovery order.
    pub const ALL: [Self; 2] = [Self::Rekey, Self::Import];
}

/// Holds a store directory and its exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - `InvalidDb` if the directory is missing and `create_if_missing` is
    ///   false, or the path is not a directory
    /// - `StoreLocked` if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_db(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_db(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the live database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        db_file(&self.path)
    }

    /// Returns the scratch file used to build a replacement database.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        files::with_suffix(&self.db_path(), TEMP_SUFFIX)
    }

    /// Returns the backup location for a maintenance swap.
    #[must_use]
    pub fn backup_path(&self, kind: SwapKind) -> PathBuf {
        files::with_suffix(&self.db_path(), kind.backup_suffix())
    }

    /// Returns the marker recording that a swap's replacement is live.
    #[must_use]
    pub fn commit_marker_path(&self, kind: SwapKind) -> PathBuf {
        files::with_suffix(&self.db_path(), kind.marker_suffix())
    }

    /// Returns true if the live database file exists.
    #[must_use]
    pub fn db_exists(&self) -> bool {
        files::database_exists(&self.db_path())
    }

    /// Sums the sizes of the live file set.
    pub fn db_size(&self) -> CoreResult<u64> {
        Ok(files::database_size(&self.db_path())?)
    }

    /// Fsyncs the directory so renames inside it are durable.
    pub fn sync(&self) -> CoreResult<()> {
        Ok(files::sync_dir(&self.path)?)
    }
}

/// Returns the live database file inside `store_dir`.
#[must_use]
pub fn db_file(store_dir: &Path) -> PathBuf {
    store_dir.join(MAIN_DB_FILE)
}

/// Deletes a store directory that no handle holds.
///
/// # Errors
///
/// Returns `StoreLocked` if the directory is still locked, `NotFound` if it
/// does not exist.
pub fn remove_store_dir(path: &Path) -> CoreResult<()> {
    if !path.is_dir() {
        return Err(CoreError::NotFound);
    }
    // Taking the lock proves no handle is open on it.
    let dir = StoreDir::open(path, false)?;
    drop(dir);
    fs::remove_dir_all(path)?;
    Ok(())
}
