//! Cross-process migration locking.
//!
//! The lock manager guarantees that at most one process applies DDL to a
//! given database at a time. The lock lives in the target database itself,
//! so it holds across separate OS processes and hosts, not just threads:
//! PostgreSQL uses an advisory lock, MySQL a named lock, and SQLite a
//! dedicated single-row table with a fixed key. The handle releases on
//! every exit path, including panics, via `Drop`.
//!
//! A crashed process can strand the SQLite lock row; `acquire` then times
//! out rather than stealing. Clearing the row is an operator decision.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{DEFAULT_LOCK_POLL_INTERVAL, DatabaseUrl};
use crate::conn::DbConnection;
use crate::error::{MigrateResult, MigrationError};

/// Name of the SQLite lock table.
pub const LOCK_TABLE: &str = "dataflow_migration_lock";

/// Acquires and releases the per-database migration lock.
#[derive(Debug, Clone)]
pub struct MigrationLockManager {
    poll_interval: Duration,
}

impl Default for MigrationLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationLockManager {
    /// Create a lock manager with the default poll interval.
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }

    /// Set the poll interval used while waiting for the lock.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Acquire the migration lock for a database, waiting up to `timeout`.
    ///
    /// The lock is scoped to the database URL's lock key, so every process
    /// pointed at the same database contends for the same lock. Fails with
    /// [`MigrationError::LockTimeout`] when the wait expires; the caller is
    /// never queued indefinitely.
    pub fn acquire(&self, database_url: &str, timeout: Duration) -> MigrateResult<LockHandle> {
        let url = DatabaseUrl::parse(database_url)?;
        let mut conn = DbConnection::connect(&url)?;

        if let DbConnection::Sqlite(inner) = &mut conn {
            ensure_lock_table(inner)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if try_acquire(&mut conn, &url)? {
                debug!(database = %url.raw, key = url.lock_key(), "migration lock acquired");
                return Ok(LockHandle {
                    conn: Some(conn),
                    url,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MigrationError::LockTimeout {
                    database: url.raw,
                    waited: timeout,
                });
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

/// A held migration lock.
///
/// The underlying connection stays open for the lifetime of the handle;
/// dropping the handle releases the lock. Prefer [`LockHandle::release`]
/// when the release outcome matters.
#[derive(Debug)]
pub struct LockHandle {
    conn: Option<DbConnection>,
    url: DatabaseUrl,
}

impl LockHandle {
    /// The lock key this handle holds.
    pub fn key(&self) -> i64 {
        self.url.lock_key()
    }

    /// Release the lock explicitly.
    pub fn release(mut self) -> MigrateResult<()> {
        match self.conn.take() {
            Some(mut conn) => release_lock(&mut conn, &self.url),
            None => Ok(()),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = release_lock(&mut conn, &self.url) {
                warn!(database = %self.url.raw, error = %e, "failed to release migration lock");
            }
        }
    }
}

fn ensure_lock_table(conn: &rusqlite::Connection) -> MigrateResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{LOCK_TABLE}\" (\n    \
         id INTEGER PRIMARY KEY CHECK (id = 1),\n    \
         lock_key INTEGER NOT NULL,\n    \
         locked_at TEXT NOT NULL\n);"
    ))
    .map_err(|e| MigrationError::connection(e.to_string()))
}

fn try_acquire(conn: &mut DbConnection, url: &DatabaseUrl) -> MigrateResult<bool> {
    match conn {
        DbConnection::Postgres(client) => {
            let row = client
                .query_one("SELECT pg_try_advisory_lock($1)", &[&url.lock_key()])
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            Ok(row.get(0))
        }
        DbConnection::MySql(inner) => {
            use mysql::prelude::Queryable;
            let acquired: Option<i64> = inner
                .exec_first("SELECT GET_LOCK(?, 0)", (url.lock_name(),))
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            Ok(acquired == Some(1))
        }
        DbConnection::Sqlite(inner) => {
            let inserted = inner.execute(
                &format!(
                    "INSERT INTO \"{LOCK_TABLE}\" (id, lock_key, locked_at) VALUES (1, ?1, ?2)"
                ),
                rusqlite::params![url.lock_key(), chrono::Utc::now().to_rfc3339()],
            );
            match inserted {
                Ok(_) => Ok(true),
                // The row exists: someone holds the lock. A busy database
                // counts as contended too; the poll loop retries either way.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation
                        || e.code == rusqlite::ErrorCode::DatabaseBusy
                        || e.code == rusqlite::ErrorCode::DatabaseLocked =>
                {
                    Ok(false)
                }
                Err(e) => Err(MigrationError::connection(e.to_string())),
            }
        }
    }
}

fn release_lock(conn: &mut DbConnection, url: &DatabaseUrl) -> MigrateResult<()> {
    match conn {
        DbConnection::Postgres(client) => client
            .execute("SELECT pg_advisory_unlock($1)", &[&url.lock_key()])
            .map(|_| ())
            .map_err(|e| MigrationError::connection(e.to_string())),
        DbConnection::MySql(inner) => {
            use mysql::prelude::Queryable;
            inner
                .exec_drop("SELECT RELEASE_LOCK(?)", (url.lock_name(),))
                .map_err(|e| MigrationError::connection(e.to_string()))
        }
        DbConnection::Sqlite(inner) => inner
            .execute(
                &format!("DELETE FROM \"{LOCK_TABLE}\" WHERE id = 1 AND lock_key = ?1"),
                rusqlite::params![url.lock_key()],
            )
            .map(|_| ())
            .map_err(|e| MigrationError::connection(e.to_string())),
    }
}
