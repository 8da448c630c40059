//! Rekey, import and export.
//!
//! Rekey and import never modify the live file in place. They build a full
//! replacement at `main.db.temp`, move the live file aside to a backup, move
//! the replacement in and reopen the engine. The backup is deleted only once
//! the engine is running on the replacement:
//!
//! ```text
//! live ──export──▶ main.db.temp
//! main.db ──rename──▶ main.db-<kind>-bak      (swap begins)
//! main.db.temp ──rename──▶ main.db
//! main.db-<kind>-done written
//! engine reinit                               (swap committed)
//! main.db-<kind>-bak, main.db-<kind>-done removed
//! ```
//!
//! A swap that is dropped uncommitted removes the marker and puts the backup
//! back. A process that dies mid-swap leaves the backup on disk. The next
//! time the store is opened, [`recover`] restores it, unless the marker shows
//! the replacement was already complete, in which case the backup is
//! discarded.

use crate::dir::{StoreDir, SwapKind};
use crate::engine::{Engine, EnginePermit, EngineState};
use crate::error::{CoreError, CoreResult};
use crate::executor::{Executor, DATA_TABLE};
use sqlkv_storage::{self as storage, files, CipherPassword, OpenDbOptions};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const EXPORT_TEMP_SUFFIX: &str = ".temp";

/// Re-encrypts the live store with `new_password`.
///
/// The engine is released for the duration and reopened afterwards. On
/// failure the live file and the recorded password are left untouched.
pub(crate) fn rekey(
    engine: &Engine,
    permit: &EnginePermit<'_>,
    dir: &StoreDir,
    new_password: &CipherPassword,
) -> CoreResult<()> {
    let old_password = engine.password();
    if old_password.is_empty() && new_password.is_empty() {
        debug!("rekey between empty passwords, nothing to do");
        return Ok(());
    }
    let source = engine
        .raw_options(&old_password)
        .ok_or_else(|| CoreError::not_supported("rekey of an in-memory store"))?;

    let temp = dir.temp_path();
    files::remove_database_files(&temp)?;
    engine.release(permit)?;

    let result = (|| -> CoreResult<()> {
        storage::export_database_file(&source, &temp, new_password)?;
        let swap = FileSwap::begin(dir, SwapKind::Rekey)?;
        swap.install(&temp)?;
        engine.reinit(permit, new_password)?;
        swap.commit();
        Ok(())
    })();
    unwind(engine, permit, dir, &old_password, "rekey", result)
}

/// Replaces the live contents with those of `source`.
///
/// The source is verified before the live file is touched. The imported
/// data is re-encrypted with the store's current password.
pub(crate) fn import(
    engine: &Engine,
    permit: &EnginePermit<'_>,
    dir: &StoreDir,
    source: &Path,
    source_password: &CipherPassword,
) -> CoreResult<()> {
    let password = engine.password();
    let source_options = verify_source(source, source_password, engine.config().busy_timeout)?;

    let temp = dir.temp_path();
    files::remove_database_files(&temp)?;

    let result = (|| -> CoreResult<()> {
        storage::export_database_file(&source_options, &temp, &password)?;
        engine.release(permit)?;
        let swap = FileSwap::begin(dir, SwapKind::Import)?;
        swap.install(&temp)?;
        engine.reinit(permit, &password)?;
        swap.commit();
        Ok(())
    })();
    unwind(engine, permit, dir, &password, "import", result)
}

/// Writes a copy of the store to `target` through `executor`.
///
/// The copy is built at `<target>.temp` and renamed into place, so a failed
/// export never leaves a partial file at `target`.
///
/// # Errors
///
/// `InvalidArgs` if `target` already exists.
pub(crate) fn export(
    executor: &mut Executor,
    target: &Path,
    password: &CipherPassword,
) -> CoreResult<()> {
    if target.exists() {
        return Err(CoreError::invalid_args(format!(
            "export target already exists: {}",
            target.display()
        )));
    }
    let temp = files::with_suffix(target, EXPORT_TEMP_SUFFIX);
    files::remove_database_files(&temp)?;

    if let Err(err) = executor.export_to(&temp, password) {
        if let Err(cleanup) = files::remove_database_files(&temp) {
            warn!(path = %temp.display(), error = %cleanup, "failed to remove export scratch file");
        }
        return Err(err);
    }
    files::rename_database(&temp, target)?;
    info!(target = %target.display(), encrypted = !password.is_empty(), "store exported");
    Ok(())
}

/// Settles any swap left behind by an interrupted rekey or import and
/// deletes scratch files. Runs before the engine opens the live file.
pub(crate) fn recover(dir: &StoreDir) -> CoreResult<()> {
    for kind in SwapKind::ALL {
        let marker = dir.commit_marker_path(kind);
        if marker.is_file() {
            files::remove_database_files(&dir.backup_path(kind))?;
            files::remove_if_exists(&marker)?;
            dir.sync()?;
            info!(store = %dir.path().display(), ?kind, "discarded backup of completed swap");
        } else if restore_backup(dir, kind)? {
            warn!(store = %dir.path().display(), ?kind, "restored database from interrupted swap");
        }
    }
    let temp = dir.temp_path();
    if files::database_exists(&temp) {
        warn!(path = %temp.display(), "removing stale scratch file");
    }
    files::remove_database_files(&temp)?;
    Ok(())
}

/// Checks that `source` opens with `password` and holds an entry table.
fn verify_source(
    source: &Path,
    password: &CipherPassword,
    busy_timeout: Duration,
) -> CoreResult<OpenDbOptions> {
    if !files::database_exists(source) {
        return Err(CoreError::invalid_args(format!(
            "import source does not exist: {}",
            source.display()
        )));
    }
    let options = OpenDbOptions::file(source)
        .password(password.clone())
        .create_if_missing(false)
        .busy_timeout(busy_timeout);
    let conn = storage::open_database(&options)?;
    if !storage::table_exists(&conn, DATA_TABLE)? {
        return Err(CoreError::invalid_args(format!(
            "import source has no {DATA_TABLE} table: {}",
            source.display()
        )));
    }
    Ok(options)
}

/// Removes scratch files and, on failure, brings the engine back up on the
/// restored file with `password`.
fn unwind(
    engine: &Engine,
    permit: &EnginePermit<'_>,
    dir: &StoreDir,
    password: &CipherPassword,
    operation: &'static str,
    result: CoreResult<()>,
) -> CoreResult<()> {
    if let Err(err) = files::remove_database_files(&dir.temp_path()) {
        warn!(operation, error = %err, "failed to remove scratch file");
    }
    match result {
        Ok(()) => {
            info!(operation, "maintenance complete");
            Ok(())
        }
        Err(err) => {
            warn!(operation, error = %err, "maintenance failed, live store restored");
            if engine.state() == EngineState::Invalid {
                if let Err(reopen) = engine.reinit(permit, password) {
                    error!(operation, error = %reopen, "failed to reopen store after rollback");
                }
            }
            Err(err)
        }
    }
}

fn restore_backup(dir: &StoreDir, kind: SwapKind) -> CoreResult<bool> {
    let backup = dir.backup_path(kind);
    if !files::database_exists(&backup) {
        return Ok(false);
    }
    let live = dir.db_path();
    files::remove_database_files(&live)?;
    files::rename_database(&backup, &live)?;
    files::remove_sidecars(&backup)?;
    dir.sync()?;
    Ok(true)
}

/// Live file moved aside to a backup. Restored on drop unless committed.
///
/// Once [`FileSwap::install`] has written the commit marker, recovery keeps
/// the replacement even if the backup outlives the process.
struct FileSwap<'a> {
    dir: &'a StoreDir,
    kind: SwapKind,
    committed: bool,
}

impl<'a> FileSwap<'a> {
    fn begin(dir: &'a StoreDir, kind: SwapKind) -> CoreResult<Self> {
        let backup = dir.backup_path(kind);
        files::remove_if_exists(&dir.commit_marker_path(kind))?;
        files::remove_database_files(&backup)?;
        files::rename_database(&dir.db_path(), &backup)?;
        files::remove_sidecars(&dir.db_path())?;
        dir.sync()?;
        debug!(?kind, "live file moved to backup");
        Ok(Self {
            dir,
            kind,
            committed: false,
        })
    }

    /// Moves `replacement` into place and marks it complete.
    fn install(&self, replacement: &Path) -> CoreResult<()> {
        files::rename_database(replacement, &self.dir.db_path())?;
        File::create(self.dir.commit_marker_path(self.kind))?.sync_all()?;
        self.dir.sync()?;
        Ok(())
    }

    /// Keeps the replacement. Cleanup failures are logged only; a leftover
    /// backup is discarded by [`recover`] because the marker outlives it.
    fn commit(mut self) {
        self.committed = true;
        let backup = self.dir.backup_path(self.kind);
        if let Err(err) = files::remove_database_files(&backup) {
            warn!(kind = ?self.kind, error = %err, "failed to remove backup of committed swap");
            return;
        }
        if let Err(err) = files::remove_if_exists(&self.dir.commit_marker_path(self.kind)) {
            warn!(kind = ?self.kind, error = %err, "failed to remove swap marker");
        }
        if let Err(err) = self.dir.sync() {
            warn!(kind = ?self.kind, error = %err, "failed to sync store directory");
        }
    }
}

impl Drop for FileSwap<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = files::remove_if_exists(&self.dir.commit_marker_path(self.kind)) {
            error!(kind = ?self.kind, error = %err, "failed to remove swap marker");
        }
        match restore_backup(self.dir, self.kind) {
            Ok(_) => debug!(kind = ?self.kind, "backup restored"),
            Err(err) => {
                error!(kind = ?self.kind, error = %err, "failed to restore backup; it is kept for recovery on next open");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::properties::StoreProperties;
    use rusqlite::params;
    use tempfile::tempdir;

    fn password(text: &str) -> CipherPassword {
        CipherPassword::try_from(text).unwrap()
    }

    fn write_db(path: &Path, password: &CipherPassword, rows: &[(&[u8], &[u8])]) {
        let conn = storage::open_database(&OpenDbOptions::file(path).password(password.clone()))
            .unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS local_data(key BLOB PRIMARY KEY NOT NULL, value BLOB NOT NULL);",
        )
        .unwrap();
        for (k, v) in rows {
            conn.execute(
                "INSERT OR REPLACE INTO local_data(key, value) VALUES (?1, ?2)",
                params![k, v],
            )
            .unwrap();
        }
    }

    fn read_value(path: &Path, password: &CipherPassword, key: &[u8]) -> Vec<u8> {
        let conn = storage::open_database(
            &OpenDbOptions::file(path)
                .password(password.clone())
                .create_if_missing(false),
        )
        .unwrap();
        conn.query_row("SELECT value FROM local_data WHERE key = ?1", [key], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn dropped_swap_restores_backup() {
        let tmp = tempdir().unwrap();
        let dir = StoreDir::open(tmp.path(), true).unwrap();
        let pw = CipherPassword::empty();
        write_db(&dir.db_path(), &pw, &[(b"k", b"old")]);
        write_db(&dir.temp_path(), &pw, &[(b"k", b"new")]);

        {
            let swap = FileSwap::begin(&dir, SwapKind::Import).unwrap();
            assert!(!dir.db_exists());
            swap.install(&dir.temp_path()).unwrap();
            assert_eq!(read_value(&dir.db_path(), &pw, b"k"), b"new");
        }
        assert_eq!(read_value(&dir.db_path(), &pw, b"k"), b"old");
        assert!(!files::database_exists(&dir.backup_path(SwapKind::Import)));
        assert!(!dir.commit_marker_path(SwapKind::Import).exists());
    }

    #[test]
    fn committed_swap_removes_backup() {
        let tmp = tempdir().unwrap();
        let dir = StoreDir::open(tmp.path(), true).unwrap();
        let pw = CipherPassword::empty();
        write_db(&dir.db_path(), &pw, &[(b"k", b"old")]);
        write_db(&dir.temp_path(), &pw, &[(b"k", b"new")]);

        let swap = FileSwap::begin(&dir, SwapKind::Rekey).unwrap();
        swap.install(&dir.temp_path()).unwrap();
        assert!(dir.commit_marker_path(SwapKind::Rekey).exists());
        swap.commit();

        assert_eq!(read_value(&dir.db_path(), &pw, b"k"), b"new");
        assert!(!files::database_exists(&dir.backup_path(SwapKind::Rekey)));
        assert!(!dir.commit_marker_path(SwapKind::Rekey).exists());
    }

    #[test]
    fn recover_keeps_committed_replacement() {
        let tmp = tempdir().unwrap();
        let props = StoreProperties::new(tmp.path(), "swap").password(password("new"));
        let dir = StoreDir::open(&props.store_dir(), true).unwrap();
        write_db(&dir.db_path(), &password("old"), &[(b"k", b"before")]);
        write_db(&dir.temp_path(), &password("new"), &[(b"k", b"after")]);

        let swap = FileSwap::begin(&dir, SwapKind::Rekey).unwrap();
        swap.install(&dir.temp_path()).unwrap();
        // The engine is live on the replacement but the backup was never
        // removed.
        std::mem::forget(swap);
        let backup = dir.backup_path(SwapKind::Rekey);
        let marker = dir.commit_marker_path(SwapKind::Rekey);
        assert!(files::database_exists(&backup));
        drop(dir);

        let db = Database::open(props).unwrap();
        assert_eq!(db.new_connection().unwrap().get(b"k").unwrap(), b"after");
        assert!(!files::database_exists(&backup));
        assert!(!marker.exists());
    }

    #[test]
    fn open_restores_interrupted_import() {
        let tmp = tempdir().unwrap();
        let props = StoreProperties::new(tmp.path(), "import").password(password("live"));
        let dir = StoreDir::open(&props.store_dir(), true).unwrap();

        // Crash after the live file was moved aside and the imported copy
        // installed, before the marker was written.
        write_db(&dir.backup_path(SwapKind::Import), &password("live"), &[(b"k", b"pre-import")]);
        write_db(&dir.db_path(), &password("live"), &[(b"k", b"imported"), (b"extra", b"x")]);
        write_db(&dir.temp_path(), &password("live"), &[]);
        let store_dir = dir.path().to_path_buf();
        drop(dir);

        let db = Database::open(props).unwrap();
        let conn = db.new_connection().unwrap();
        assert_eq!(conn.get(b"k").unwrap(), b"pre-import");
        assert!(conn.get(b"extra").unwrap_err().is_not_found());

        let leftovers: Vec<_> = std::fs::read_dir(&store_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".temp") || name.contains("-bak") || name.ends_with("-done"))
            .collect();
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
    }

    #[test]
    fn recover_restores_interrupted_swap() {
        let tmp = tempdir().unwrap();
        let dir = StoreDir::open(tmp.path(), true).unwrap();
        let pw = CipherPassword::try_from("secret").unwrap();

        // Crash after the backup was taken and the replacement installed.
        write_db(&dir.backup_path(SwapKind::Rekey), &pw, &[(b"k", b"before")]);
        write_db(&dir.db_path(), &CipherPassword::empty(), &[(b"k", b"after")]);
        write_db(&dir.temp_path(), &pw, &[]);

        recover(&dir).unwrap();
        assert_eq!(read_value(&dir.db_path(), &pw, b"k"), b"before");
        assert!(!files::database_exists(&dir.temp_path()));
        assert!(!files::database_exists(&dir.backup_path(SwapKind::Rekey)));
    }

    #[test]
    fn verify_source_rejects_bad_input() {
        let tmp = tempdir().unwrap();
        let pw = CipherPassword::try_from("pw").unwrap();
        let timeout = Duration::from_secs(1);

        let missing = tmp.path().join("missing.db");
        assert!(matches!(
            verify_source(&missing, &pw, timeout),
            Err(CoreError::InvalidArgs { .. })
        ));

        let good = tmp.path().join("good.db");
        write_db(&good, &pw, &[(b"k", b"v")]);
        assert!(verify_source(&good, &pw, timeout).is_ok());
        assert!(matches!(
            verify_source(&good, &CipherPassword::try_from("nope").unwrap(), timeout),
            Err(CoreError::InvalidPasswordOrCorrupted)
        ));

        let foreign = tmp.path().join("foreign.db");
        let conn = storage::open_database(&OpenDbOptions::file(&foreign)).unwrap();
        conn.execute_batch("CREATE TABLE other(x)").unwrap();
        drop(conn);
        assert!(matches!(
            verify_source(&foreign, &CipherPassword::empty(), timeout),
            Err(CoreError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn export_refuses_existing_target() {
        let tmp = tempdir().unwrap();
        let mut executor = Executor::open(&OpenDbOptions::memory(), true).unwrap();
        executor.create_tables().unwrap();

        let target = tmp.path().join("copy.db");
        std::fs::write(&target, b"taken").unwrap();
        assert!(matches!(
            export(&mut executor, &target, &CipherPassword::empty()),
            Err(CoreError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn export_writes_complete_copy() {
        let tmp = tempdir().unwrap();
        let mut executor = Executor::open(&OpenDbOptions::memory(), true).unwrap();
        executor.create_tables().unwrap();
        executor.put(b"k", b"v").unwrap();

        let target = tmp.path().join("copy.db");
        let pw = CipherPassword::try_from("copy").unwrap();
        export(&mut executor, &target, &pw).unwrap();

        assert_eq!(read_value(&target, &pw, b"k"), b"v");
        assert!(!files::database_exists(&files::with_suffix(&target, EXPORT_TEMP_SUFFIX)));
    }
}
