//! Operations against the embedded SQL engine.
//!
//! Every function takes a plain [`rusqlite::Connection`]; callers own
//! statement caching and transaction boundaries.

use crate::error::{StorageError, StorageResult};
use crate::files;
use crate::options::OpenDbOptions;
use crate::password::CipherPassword;
use rusqlite::{params, Connection, DatabaseName, ErrorCode, OpenFlags};
use std::io;
use std::path::Path;
use tracing::debug;

const EXPORT_SCHEMA: &str = "sqlkv_export";

/// Opens one physical connection.
///
/// Applies the cipher key, the busy timeout and either query-only mode or,
/// for file-backed connections with `wal` set, WAL journaling. The key is
/// verified before returning.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] if the file cannot be read with the
/// supplied password, or the engine error if the file cannot be opened.
pub fn open_database(options: &OpenDbOptions) -> StorageResult<Connection> {
    let conn = match &options.path {
        None => Connection::open_in_memory()?,
        Some(path) => {
            let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI;
            if options.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
            let conn = Connection::open_with_flags(path, flags)?;
            set_cipher_key(&conn, &options.password)?;
            conn
        }
    };

    conn.busy_timeout(options.busy_timeout)?;
    verify_key(&conn)?;

    if options.query_only {
        conn.pragma_update(None, "query_only", true)?;
    } else if options.wal && !options.is_memory() {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }

    debug!(
        path = ?options.path,
        query_only = options.query_only,
        encrypted = !options.password.is_empty(),
        "opened database connection"
    );
    Ok(conn)
}

/// Applies the cipher key to a freshly opened connection.
///
/// An empty password leaves the connection in plaintext mode.
pub fn set_cipher_key(conn: &Connection, password: &CipherPassword) -> StorageResult<()> {
    if let Some(literal) = password.key_literal()? {
        conn.pragma_update(None, "key", literal.as_str())?;
    }
    Ok(())
}

/// Checks that the schema can be read with the applied key.
pub fn verify_key(conn: &Connection) -> StorageResult<()> {
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|_| ())
    .map_err(|err| match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) => StorageError::InvalidKey,
        _ => StorageError::Sqlite(err),
    })
}

/// Writes a complete copy of `conn`'s main database to `target`, encrypted
/// with `password` (plaintext when empty).
///
/// The target must not exist yet. The user version is carried over. An
/// attached database inherits `conn`'s open flags, so `conn` must have been
/// opened with `create_if_missing` set.
pub fn export_database(
    conn: &Connection,
    target: &Path,
    password: &CipherPassword,
) -> StorageResult<()> {
    let target_str = path_str(target)?;
    let key = password.key_literal()?;
    let key_str = key.as_ref().map_or("", |k| k.as_str());

    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {EXPORT_SCHEMA} KEY ?2"),
        params![target_str, key_str],
    )?;

    let exported = (|| -> StorageResult<()> {
        conn.query_row(
            &format!("SELECT sqlcipher_export('{EXPORT_SCHEMA}')"),
            [],
            |_| Ok(()),
        )?;
        let version = get_version(conn)?;
        conn.pragma_update(Some(DatabaseName::Attached(EXPORT_SCHEMA)), "user_version", version)?;
        Ok(())
    })();

    let detached = conn.execute(&format!("DETACH DATABASE {EXPORT_SCHEMA}"), []);
    exported?;
    detached?;

    debug!(target = %target.display(), "exported database");
    Ok(())
}

/// Opens `source` and exports it to `target` with `password`.
///
/// Used for files no pooled connection is attached to. The source file must
/// already exist; `source.create_if_missing` is ignored.
pub fn export_database_file(
    source: &OpenDbOptions,
    target: &Path,
    password: &CipherPassword,
) -> StorageResult<()> {
    if let Some(path) = &source.path {
        if !files::database_exists(path) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("export source does not exist: {}", path.display()),
            )));
        }
    }
    let conn = open_database(&source.clone().create_if_missing(true))?;
    export_database(&conn, target, password)
}

/// Returns the stored user version.
pub fn get_version(conn: &Connection) -> StorageResult<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Stores the user version.
pub fn set_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Returns true if a table with this name exists in the main schema.
pub fn table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Runs the engine's integrity check and returns the reported problems.
///
/// An empty list means the file is consistent.
pub fn check_integrity(conn: &Connection) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA integrity_check")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut problems = Vec::new();
    for row in rows {
        let line = row?;
        if line != "ok" {
            problems.push(line);
        }
    }
    Ok(problems)
}

/// Folds the write-ahead log back into the main file and truncates it.
pub fn checkpoint(conn: &Connection) -> StorageResult<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    Ok(())
}

fn path_str(path: &Path) -> StorageResult<&str> {
    path.to_str()
        .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn password(s: &str) -> CipherPassword {
        CipherPassword::try_from(s).unwrap()
    }

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE t(k BLOB PRIMARY KEY, v BLOB NOT NULL);
             INSERT INTO t VALUES (x'01', x'aa'), (x'02', x'bb');",
        )
        .unwrap();
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn encrypted_roundtrip_and_wrong_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.db");

        let opts = OpenDbOptions::file(&path).password(password("pw"));
        let conn = open_database(&opts).unwrap();
        seed(&conn);
        drop(conn);

        let conn = open_database(&opts).unwrap();
        assert_eq!(count(&conn), 2);
        drop(conn);

        let wrong = OpenDbOptions::file(&path).password(password("nope"));
        assert!(matches!(open_database(&wrong), Err(StorageError::InvalidKey)));

        let plain = OpenDbOptions::file(&path);
        assert!(matches!(open_database(&plain), Err(StorageError::InvalidKey)));
    }

    #[test]
    fn missing_file_without_create_fails() {
        let dir = tempdir().unwrap();
        let opts = OpenDbOptions::file(dir.path().join("absent.db")).create_if_missing(false);
        assert!(open_database(&opts).is_err());
    }

    #[test]
    fn export_reencrypts_and_keeps_version() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("main.db");
        let target = dir.path().join("copy.db");

        let conn = open_database(&OpenDbOptions::file(&source).wal(true)).unwrap();
        seed(&conn);
        set_version(&conn, 7).unwrap();
        export_database(&conn, &target, &password("new")).unwrap();
        drop(conn);

        let copy = open_database(&OpenDbOptions::file(&target).password(password("new"))).unwrap();
        assert_eq!(count(&copy), 2);
        assert_eq!(get_version(&copy).unwrap(), 7);
        assert!(table_exists(&copy, "t").unwrap());
        assert!(!table_exists(&copy, "missing").unwrap());
    }

    #[test]
    fn export_file_to_plaintext() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("main.db");
        let target = dir.path().join("plain.db");

        let opts = OpenDbOptions::file(&source).password(password("pw"));
        seed(&open_database(&opts).unwrap());

        export_database_file(&opts, &target, &CipherPassword::empty()).unwrap();
        let copy = open_database(&OpenDbOptions::file(&target)).unwrap();
        assert_eq!(count(&copy), 2);
    }

    #[test]
    fn export_file_from_existing_only_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("main.db");
        let target = dir.path().join("main.db.temp");
        seed(&open_database(&OpenDbOptions::file(&source).password(password("old"))).unwrap());

        let opts = OpenDbOptions::file(&source)
            .password(password("old"))
            .create_if_missing(false);
        export_database_file(&opts, &target, &password("new")).unwrap();

        let copy = open_database(
            &OpenDbOptions::file(&target)
                .password(password("new"))
                .create_if_missing(false),
        )
        .unwrap();
        assert_eq!(count(&copy), 2);
    }

    #[test]
    fn export_file_requires_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("absent.db");
        let target = dir.path().join("copy.db");

        let err = export_database_file(&OpenDbOptions::file(&source), &target, &password("pw"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
        assert!(!files::database_exists(&source));
        assert!(!files::database_exists(&target));
    }

    #[test]
    fn integrity_and_checkpoint_on_healthy_file() {
        let dir = tempdir().unwrap();
        let conn = open_database(&OpenDbOptions::file(dir.path().join("main.db")).wal(true)).unwrap();
        seed(&conn);
        checkpoint(&conn).unwrap();
        assert!(check_integrity(&conn).unwrap().is_empty());
    }

    #[test]
    fn query_only_refuses_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.db");
        let writer = open_database(&OpenDbOptions::file(&path).wal(true)).unwrap();
        seed(&writer);

        let reader = open_database(&OpenDbOptions::file(&path).query_only(true)).unwrap();
        assert_eq!(count(&reader), 2);
        assert!(reader.execute("DELETE FROM t", []).is_err());
    }

    #[test]
    fn memory_database_ignores_wal() {
        let conn = open_database(&OpenDbOptions::memory().wal(true)).unwrap();
        seed(&conn);
        assert_eq!(count(&conn), 2);
    }
}
