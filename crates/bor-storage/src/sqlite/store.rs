//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::sqlite::schema;

/// SQLite-backed store shared by every task in the daemon.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex`. All public methods
/// acquire the lock, execute SQL, and release it, so the write path is
/// serialized while callers stay oblivious.
pub struct SqliteStore {
    /// The mutex-protected SQLite connection.
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path.
    ///
    /// Enables WAL mode and foreign keys, refuses databases written by a
    /// newer binary, then applies pending forward migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let conn = Connection::open(path).map_err(|e| {
            StoreError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;

        Ok(store)
    }

    /// Opens an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(format!("failed to open in-memory db: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;

        Ok(store)
    }

    /// Sets connection pragmas (WAL mode, foreign keys, busy timeout).
    fn configure_connection(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StoreError::Connection(format!("failed to set pragmas: {e}")))?;
        Ok(())
    }

    /// Creates tables, checks the version gate and runs forward migrations.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        // The version gate must run before any DDL touches the database.
        let stored = read_schema_version(&conn);
        if stored > schema::DB_SCHEMA_VERSION {
            return Err(StoreError::SchemaTooNew {
                stored,
                supported: schema::DB_SCHEMA_VERSION,
            });
        }

        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).map_err(|e| StoreError::Migration {
                version: 1,
                reason: format!("{e}\nStatement: {}", truncate(stmt, 120)),
            })?;
        }

        Self::run_migrations_on_conn(&conn, stored)?;

        write_schema_version(&conn, schema::DB_SCHEMA_VERSION)?;
        info!(version = schema::DB_SCHEMA_VERSION, "schema initialized");
        Ok(())
    }

    /// Applies forward migrations above the stored version.
    fn run_migrations_on_conn(conn: &Connection, stored: i32) -> Result<()> {
        for &(version, stmts) in schema::MIGRATIONS {
            if version <= stored {
                debug!(version, "migration already applied, skipping");
                continue;
            }
            debug!(version, "applying migration");
            for stmt in stmts {
                if let Err(e) = conn.execute_batch(stmt) {
                    // Additive-only migrations may be re-run against a
                    // database that already carries the column.
                    if e.to_string().contains("duplicate column name") {
                        debug!(version, "column already present, skipping statement");
                        continue;
                    }
                    return Err(StoreError::Migration {
                        version,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns the schema version currently recorded in the database.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock_conn()?;
        Ok(read_schema_version(&conn))
    }

    /// Offline downgrade: runs registered reverse steps from the current
    /// version down to `target`, then resets the stored version integer.
    /// Versions without reverse SQL are skipped but still counted down.
    pub fn downgrade(&self, target: i32) -> Result<()> {
        let conn = self.lock_conn()?;
        let current = read_schema_version(&conn);
        if target >= current {
            return Err(StoreError::Migration {
                version: target,
                reason: format!("target {target} is not below current version {current}"),
            });
        }

        for version in (target + 1..=current).rev() {
            let Some(stmts) = schema::reverse_steps(version) else {
                debug!(version, "no reverse steps registered, skipping");
                continue;
            };
            info!(version, "reversing migration");
            for stmt in stmts {
                conn.execute_batch(stmt).map_err(|e| StoreError::Migration {
                    version,
                    reason: e.to_string(),
                })?;
            }
        }

        write_schema_version(&conn, target)?;
        info!(version = target, "schema downgraded");
        Ok(())
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Connection(format!("mutex poisoned: {e}")))
    }
}

/// Reads the schema version of a database file without opening the
/// store (and therefore without running forward migrations). Used by the
/// migrate tool to report on databases written by other binaries.
pub fn peek_schema_version(path: impl AsRef<Path>) -> Result<i32> {
    let path = path.as_ref();
    let conn = Connection::open(path).map_err(|e| {
        StoreError::Connection(format!("failed to open {}: {e}", path.display()))
    })?;
    Ok(read_schema_version(&conn))
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Reads the stored schema version; 0 when the meta table is absent.
fn read_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        rusqlite::params![schema::SCHEMA_VERSION_KEY],
        |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i32>().unwrap_or(0))
        },
    )
    .unwrap_or(0)
}

fn write_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        rusqlite::params![schema::SCHEMA_VERSION_KEY, version.to_string()],
    )
    .map_err(|e| StoreError::Migration {
        version,
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Truncates a string for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_initializes_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), schema::DB_SCHEMA_VERSION);
    }

    #[test]
    fn idempotent_init() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn rejects_newer_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bor.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            let conn = store.lock_conn().unwrap();
            write_schema_version(&conn, schema::DB_SCHEMA_VERSION + 5).unwrap();
        }
        let err = SqliteStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::SchemaTooNew { .. }), "{err}");
    }

    #[test]
    fn downgrade_resets_version_without_reverse_sql() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.downgrade(0).unwrap();
        assert_eq!(store.schema_version().unwrap(), 0);
    }

    #[test]
    fn downgrade_requires_lower_target() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.downgrade(schema::DB_SCHEMA_VERSION).unwrap_err();
        assert!(matches!(err, StoreError::Migration { .. }));
    }

    #[test]
    fn downgrade_then_reopen_migrates_forward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bor.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.downgrade(1).unwrap();
            assert_eq!(store.schema_version().unwrap(), 1);
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), schema::DB_SCHEMA_VERSION);
    }
}
