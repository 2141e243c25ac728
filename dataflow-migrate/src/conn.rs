//! Synchronous database connections.
//!
//! Every connection here is blocking by design. DDL execution must never
//! share the caller's async runtime state: pooled async connections keyed
//! by event-loop identity corrupt when reused across unrelated loops, so
//! the executor and lock manager open dedicated synchronous connections
//! and close them with the call. Async callers go through the
//! [`crate::nonblocking`] facade instead of calling these directly.

use tracing::debug;

use crate::config::{DatabaseKind, DatabaseUrl};
use crate::error::{MigrateResult, MigrationError};
use crate::sql::Dialect;

/// A synchronous connection to one of the supported backends.
pub enum DbConnection {
    /// PostgreSQL.
    Postgres(postgres::Client),
    /// MySQL.
    MySql(mysql::Conn),
    /// SQLite (file or in-memory).
    Sqlite(rusqlite::Connection),
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Postgres(_) => "DbConnection::Postgres",
            Self::MySql(_) => "DbConnection::MySql",
            Self::Sqlite(_) => "DbConnection::Sqlite",
        })
    }
}

impl DbConnection {
    /// Open a new connection for the given URL.
    pub fn connect(url: &DatabaseUrl) -> MigrateResult<Self> {
        match &url.kind {
            DatabaseKind::Postgres => {
                let client = postgres::Client::connect(&url.raw, postgres::NoTls)
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                Ok(Self::Postgres(client))
            }
            DatabaseKind::MySql => {
                let opts = mysql::Opts::from_url(&url.raw)
                    .map_err(|e| MigrationError::config(format!("invalid mysql URL: {e}")))?;
                let conn = mysql::Conn::new(opts)
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                Ok(Self::MySql(conn))
            }
            DatabaseKind::Sqlite { path } => {
                let conn = rusqlite::Connection::open(path)
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                // Concurrent processes poke the same file; wait out short
                // write bursts instead of surfacing SQLITE_BUSY.
                conn.busy_timeout(std::time::Duration::from_millis(5000))
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                Ok(Self::Sqlite(conn))
            }
            DatabaseKind::SqliteMemory => {
                let conn = rusqlite::Connection::open_in_memory()
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                Ok(Self::Sqlite(conn))
            }
        }
    }

    /// The dialect this connection speaks.
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Postgres(_) => Dialect::Postgres,
            Self::MySql(_) => Dialect::MySql,
            Self::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Execute a statement, discarding any result.
    pub fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        self.execute_raw(sql).map_err(MigrationError::Connection)
    }

    /// Execute a statement, returning the raw driver message on failure.
    /// The executor uses this to wrap failures with statement context.
    pub(crate) fn execute_raw(&mut self, sql: &str) -> Result<(), String> {
        debug!(sql = %sql, "executing statement");
        match self {
            Self::Postgres(client) => client.batch_execute(sql).map_err(|e| e.to_string()),
            Self::MySql(conn) => {
                use mysql::prelude::Queryable;
                conn.query_drop(sql).map_err(|e| e.to_string())
            }
            Self::Sqlite(conn) => conn.execute_batch(sql).map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_memory_connect_and_execute() {
        let url = DatabaseUrl::parse(":memory:").unwrap();
        let mut conn = DbConnection::connect(&url).unwrap();
        assert_eq!(conn.dialect(), Dialect::Sqlite);

        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY);").unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1);").unwrap();
    }

    #[test]
    fn test_execute_surfaces_driver_error() {
        let url = DatabaseUrl::parse(":memory:").unwrap();
        let mut conn = DbConnection::connect(&url).unwrap();

        let err = conn.execute("NOT VALID SQL").unwrap_err();
        assert!(matches!(err, MigrationError::Connection(_)));
    }
}
