//! Physical file set of a database.
//!
//! A database file `main.db` may be accompanied by `main.db-wal` and
//! `main.db-shm` while connections are open. These helpers always treat the
//! three as one unit.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix of the write-ahead log sidecar.
pub const WAL_SUFFIX: &str = "-wal";
/// Suffix of the shared-memory index sidecar.
pub const SHM_SUFFIX: &str = "-shm";

/// Returns `path` with `suffix` appended to its file name.
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Returns the main file followed by its sidecars.
#[must_use]
pub fn file_set(path: &Path) -> [PathBuf; 3] {
    [
        path.to_path_buf(),
        with_suffix(path, WAL_SUFFIX),
        with_suffix(path, SHM_SUFFIX),
    ]
}

/// Returns true if the main file exists.
#[must_use]
pub fn database_exists(path: &Path) -> bool {
    path.is_file()
}

/// Removes the main file and its sidecars. Missing files are ignored.
pub fn remove_database_files(path: &Path) -> io::Result<()> {
    for file in file_set(path) {
        remove_if_exists(&file)?;
    }
    Ok(())
}

/// Removes only the sidecars of `path`.
pub fn remove_sidecars(path: &Path) -> io::Result<()> {
    remove_if_exists(&with_suffix(path, WAL_SUFFIX))?;
    remove_if_exists(&with_suffix(path, SHM_SUFFIX))
}

/// Removes a single file, ignoring a missing one.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Sums the sizes of the main file and its sidecars.
pub fn database_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for file in file_set(path) {
        match fs::metadata(&file) {
            Ok(meta) => total += meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

/// Renames the main file. Both paths must be on the same filesystem.
///
/// Stale sidecars at the destination are removed first so they can never be
/// replayed against the renamed file.
pub fn rename_database(from: &Path, to: &Path) -> io::Result<()> {
    remove_sidecars(to)?;
    fs::rename(from, to)
}

/// Flushes directory metadata so a preceding rename is durable.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
