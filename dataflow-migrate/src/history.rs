//! Migration history tracking.
//!
//! Applied migrations are recorded in an append-only ledger inside the
//! target database (`dataflow_migrations` by default). The ledger is what
//! makes repeated `auto_migrate` calls idempotent: a migration whose
//! checksum is already recorded is never reapplied, regardless of which
//! process recorded it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conn::DbConnection;
use crate::error::{MigrateResult, MigrationError};
use crate::sql::Dialect;

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration version.
    pub version: String,
    /// Checksum of the operation sequence.
    pub checksum: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// Whether the apply succeeded. Rows are only written on success, so
    /// this is true for every row this engine writes; the column exists so
    /// external tooling can mark manual interventions.
    pub success: bool,
}

/// History table DDL for the given dialect.
pub fn init_sql(dialect: Dialect, table: &str) -> String {
    let quoted = dialect.quote(table);
    match dialect {
        Dialect::Postgres => format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (\n    \
             version TEXT NOT NULL,\n    \
             checksum TEXT NOT NULL,\n    \
             applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),\n    \
             success BOOLEAN NOT NULL DEFAULT TRUE\n);"
        ),
        Dialect::MySql => format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (\n    \
             version VARCHAR(255) NOT NULL,\n    \
             checksum VARCHAR(64) NOT NULL,\n    \
             applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,\n    \
             success TINYINT(1) NOT NULL DEFAULT 1\n);"
        ),
        Dialect::Sqlite => format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (\n    \
             version TEXT NOT NULL,\n    \
             checksum TEXT NOT NULL,\n    \
             applied_at TEXT NOT NULL,\n    \
             success INTEGER NOT NULL DEFAULT 1\n);"
        ),
    }
}

/// Create the history table when absent.
pub fn ensure_history_table(conn: &mut DbConnection, table: &str) -> MigrateResult<()> {
    let sql = init_sql(conn.dialect(), table);
    conn.execute(&sql)
}

/// Check whether a migration with this checksum is recorded as applied.
pub fn checksum_applied(
    conn: &mut DbConnection,
    table: &str,
    checksum: &str,
) -> MigrateResult<bool> {
    let quoted = conn.dialect().quote(table);
    match conn {
        DbConnection::Postgres(client) => {
            let sql =
                format!("SELECT 1 FROM {quoted} WHERE checksum = $1 AND success LIMIT 1");
            let row = client
                .query_opt(&sql, &[&checksum])
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            Ok(row.is_some())
        }
        DbConnection::MySql(inner) => {
            use mysql::prelude::Queryable;
            let sql =
                format!("SELECT 1 FROM {quoted} WHERE checksum = ? AND success = 1 LIMIT 1");
            let row: Option<i64> = inner
                .exec_first(&sql, (checksum,))
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            Ok(row.is_some())
        }
        DbConnection::Sqlite(inner) => {
            use rusqlite::OptionalExtension;
            let sql =
                format!("SELECT 1 FROM {quoted} WHERE checksum = ?1 AND success = 1 LIMIT 1");
            let row: Option<i64> = inner
                .query_row(&sql, rusqlite::params![checksum], |r| r.get(0))
                .optional()
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            Ok(row.is_some())
        }
    }
}

/// Fetch the recorded checksum for a version, when one exists.
pub fn version_checksum(
    conn: &mut DbConnection,
    table: &str,
    version: &str,
) -> MigrateResult<Option<String>> {
    let quoted = conn.dialect().quote(table);
    match conn {
        DbConnection::Postgres(client) => {
            let sql = format!("SELECT checksum FROM {quoted} WHERE version = $1 LIMIT 1");
            let row = client
                .query_opt(&sql, &[&version])
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            Ok(row.map(|r| r.get(0)))
        }
        DbConnection::MySql(inner) => {
            use mysql::prelude::Queryable;
            let sql = format!("SELECT checksum FROM {quoted} WHERE version = ? LIMIT 1");
            inner
                .exec_first(&sql, (version,))
                .map_err(|e| MigrationError::connection(e.to_string()))
        }
        DbConnection::Sqlite(inner) => {
            use rusqlite::OptionalExtension;
            let sql = format!("SELECT checksum FROM {quoted} WHERE version = ?1 LIMIT 1");
            inner
                .query_row(&sql, rusqlite::params![version], |r| r.get(0))
                .optional()
                .map_err(|e| MigrationError::connection(e.to_string()))
        }
    }
}

/// Append a successful-apply record. Never updates existing rows.
pub fn insert_record(
    conn: &mut DbConnection,
    table: &str,
    version: &str,
    checksum: &str,
) -> MigrateResult<()> {
    let quoted = conn.dialect().quote(table);
    match conn {
        DbConnection::Postgres(client) => {
            let sql = format!(
                "INSERT INTO {quoted} (version, checksum, success) VALUES ($1, $2, TRUE)"
            );
            client
                .execute(&sql, &[&version, &checksum])
                .map(|_| ())
                .map_err(|e| MigrationError::connection(e.to_string()))
        }
        DbConnection::MySql(inner) => {
            use mysql::prelude::Queryable;
            let sql =
                format!("INSERT INTO {quoted} (version, checksum, success) VALUES (?, ?, 1)");
            inner
                .exec_drop(&sql, (version, checksum))
                .map_err(|e| MigrationError::connection(e.to_string()))
        }
        DbConnection::Sqlite(inner) => {
            let sql = format!(
                "INSERT INTO {quoted} (version, checksum, applied_at, success) \
                 VALUES (?1, ?2, ?3, 1)"
            );
            inner
                .execute(
                    &sql,
                    rusqlite::params![version, checksum, Utc::now().to_rfc3339()],
                )
                .map(|_| ())
                .map_err(|e| MigrationError::connection(e.to_string()))
        }
    }
}

/// Read the full ledger, oldest first.
pub fn read_history(conn: &mut DbConnection, table: &str) -> MigrateResult<Vec<MigrationRecord>> {
    let quoted = conn.dialect().quote(table);
    match conn {
        DbConnection::Postgres(client) => {
            let sql = format!(
                "SELECT version, checksum, applied_at, success FROM {quoted} ORDER BY applied_at"
            );
            let rows = client
                .query(&sql, &[])
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            Ok(rows
                .iter()
                .map(|row| MigrationRecord {
                    version: row.get(0),
                    checksum: row.get(1),
                    applied_at: row.get(2),
                    success: row.get(3),
                })
                .collect())
        }
        DbConnection::MySql(inner) => {
            use mysql::prelude::Queryable;
            let sql = format!(
                "SELECT version, checksum, \
                 DATE_FORMAT(applied_at, '%Y-%m-%dT%H:%i:%sZ'), success \
                 FROM {quoted} ORDER BY applied_at"
            );
            let rows: Vec<(String, String, String, i64)> = inner
                .query(&sql)
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            rows.into_iter()
                .map(|(version, checksum, applied_at, success)| {
                    Ok(MigrationRecord {
                        version,
                        checksum,
                        applied_at: parse_timestamp(&applied_at)?,
                        success: success != 0,
                    })
                })
                .collect()
        }
        DbConnection::Sqlite(inner) => {
            let sql = format!(
                "SELECT version, checksum, applied_at, success FROM {quoted} ORDER BY applied_at"
            );
            let mut stmt = inner
                .prepare(&sql)
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(|e| MigrationError::connection(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let (version, checksum, applied_at, success) =
                    row.map_err(|e| MigrationError::connection(e.to_string()))?;
                records.push(MigrationRecord {
                    version,
                    checksum,
                    applied_at: parse_timestamp(&applied_at)?,
                    success: success != 0,
                });
            }
            Ok(records)
        }
    }
}

fn parse_timestamp(raw: &str) -> MigrateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            MigrationError::connection(format!("invalid timestamp '{raw}' in history table: {e}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_HISTORY_TABLE, DatabaseUrl};

    fn memory_conn() -> DbConnection {
        let url = DatabaseUrl::parse(":memory:").unwrap();
        DbConnection::connect(&url).unwrap()
    }

    #[test]
    fn test_init_sql_per_dialect() {
        for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite] {
            let sql = init_sql(dialect, DEFAULT_HISTORY_TABLE);
            assert!(sql.contains("dataflow_migrations"), "{dialect:?}");
            assert!(sql.contains("checksum"), "{dialect:?}");
            assert!(sql.contains("applied_at"), "{dialect:?}");
        }
    }

    #[test]
    fn test_sqlite_ledger_round_trip() {
        let mut conn = memory_conn();
        ensure_history_table(&mut conn, DEFAULT_HISTORY_TABLE).unwrap();

        assert!(!checksum_applied(&mut conn, DEFAULT_HISTORY_TABLE, "abc").unwrap());
        insert_record(&mut conn, DEFAULT_HISTORY_TABLE, "auto_1", "abc").unwrap();
        assert!(checksum_applied(&mut conn, DEFAULT_HISTORY_TABLE, "abc").unwrap());
        assert!(!checksum_applied(&mut conn, DEFAULT_HISTORY_TABLE, "def").unwrap());

        assert_eq!(
            version_checksum(&mut conn, DEFAULT_HISTORY_TABLE, "auto_1").unwrap(),
            Some("abc".to_string())
        );
        assert_eq!(
            version_checksum(&mut conn, DEFAULT_HISTORY_TABLE, "auto_2").unwrap(),
            None
        );

        let records = read_history(&mut conn, DEFAULT_HISTORY_TABLE).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, "auto_1");
        assert!(records[0].success);
    }

    #[test]
    fn test_ensure_history_table_is_idempotent() {
        let mut conn = memory_conn();
        ensure_history_table(&mut conn, DEFAULT_HISTORY_TABLE).unwrap();
        ensure_history_table(&mut conn, DEFAULT_HISTORY_TABLE).unwrap();
    }
}
