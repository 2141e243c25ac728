//! Transactional DDL execution with checksum idempotence.

use std::time::Instant;

use tracing::{debug, info};

use crate::config::{DEFAULT_HISTORY_TABLE, DatabaseUrl};
use crate::conn::DbConnection;
use crate::error::{MigrateResult, MigrationError};
use crate::history;
use crate::migration::Migration;
use crate::sql::{Dialect, SqlGenerator};

/// Result of executing one migration.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// Version of the migration.
    pub version: String,
    /// Number of DDL statements executed. Zero when skipped.
    pub statements_executed: usize,
    /// Whether the migration was skipped because its checksum is already
    /// recorded in the history table.
    pub skipped: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
}

impl MigrationResult {
    /// Get a short human-readable summary.
    pub fn summary(&self) -> String {
        if self.skipped {
            format!("{}: already applied, skipped", self.version)
        } else {
            format!(
                "{}: {} statement(s) in {}ms",
                self.version, self.statements_executed, self.duration_ms
            )
        }
    }
}

/// Applies migrations over a dedicated synchronous connection.
///
/// Each call opens its own blocking connection and closes it on return.
/// This keeps DDL execution fully isolated from any async runtime the
/// caller happens to be on; pooled async connections keyed by event-loop
/// identity have corrupted state when shared across loops, and a private
/// synchronous connection cannot be shared at all.
///
/// Statements run inside a single transaction: all of them apply, followed
/// by the history record, or none do. MySQL commits DDL implicitly, so the
/// full-rollback guarantee holds on PostgreSQL and SQLite; on MySQL a
/// failed migration may leave earlier statements applied, which the
/// returned error's completed-count makes visible.
#[derive(Debug, Clone)]
pub struct DdlExecutor {
    url: DatabaseUrl,
    history_table: String,
}

impl DdlExecutor {
    /// Create an executor for a database URL.
    pub fn new(database_url: &str) -> MigrateResult<Self> {
        Ok(Self::from_url(DatabaseUrl::parse(database_url)?))
    }

    /// Create an executor from an already-parsed URL.
    pub fn from_url(url: DatabaseUrl) -> Self {
        Self {
            url,
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
        }
    }

    /// Set the history table name.
    pub fn history_table(mut self, name: impl Into<String>) -> Self {
        self.history_table = name.into();
        self
    }

    /// Apply a migration, once.
    ///
    /// If the migration's checksum is already recorded the call returns a
    /// successful no-op without executing any DDL; this is what makes
    /// repeated runs and racing processes converge on one application. A
    /// recorded row with the same version but a different checksum is a
    /// [`MigrationError::ChecksumMismatch`] and is never auto-resolved.
    pub fn execute(&self, migration: &Migration) -> MigrateResult<MigrationResult> {
        let start = Instant::now();
        let mut conn = DbConnection::connect(&self.url)?;

        history::ensure_history_table(&mut conn, &self.history_table)?;

        if history::checksum_applied(&mut conn, &self.history_table, &migration.checksum)? {
            debug!(
                version = %migration.version,
                checksum = %migration.checksum,
                "migration already recorded, skipping"
            );
            return Ok(MigrationResult {
                version: migration.version.clone(),
                statements_executed: 0,
                skipped: true,
                duration_ms: start.elapsed().as_millis() as i64,
            });
        }

        if let Some(recorded) =
            history::version_checksum(&mut conn, &self.history_table, &migration.version)?
        {
            if recorded != migration.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    version: migration.version.clone(),
                    expected: recorded,
                    actual: migration.checksum.clone(),
                });
            }
        }

        // Render everything up front so an unrepresentable operation fails
        // before the transaction opens.
        let statements = SqlGenerator::new(Dialect::for_url(&self.url)).generate(migration)?;

        conn.execute("BEGIN")?;
        for (completed, statement) in statements.iter().enumerate() {
            if let Err(message) = conn.execute_raw(statement) {
                let _ = conn.execute_raw("ROLLBACK");
                return Err(MigrationError::ddl(statement.clone(), message, completed));
            }
        }

        if let Err(e) = history::insert_record(
            &mut conn,
            &self.history_table,
            &migration.version,
            &migration.checksum,
        ) {
            let _ = conn.execute_raw("ROLLBACK");
            return Err(e);
        }
        conn.execute("COMMIT")?;

        let result = MigrationResult {
            version: migration.version.clone(),
            statements_executed: statements.len(),
            skipped: false,
            duration_ms: start.elapsed().as_millis() as i64,
        };
        info!(
            version = %result.version,
            statements = result.statements_executed,
            duration_ms = result.duration_ms,
            "migration applied"
        );
        Ok(result)
    }

    /// Apply raw DDL statements in a single transaction.
    ///
    /// Returns the number of statements executed. On failure the whole
    /// batch rolls back and the error reports how many statements had
    /// completed; that count is diagnostic only, not a resumption point.
    pub fn execute_ddl_batch(&self, statements: &[String]) -> MigrateResult<usize> {
        let mut conn = DbConnection::connect(&self.url)?;

        conn.execute("BEGIN")?;
        for (completed, statement) in statements.iter().enumerate() {
            if let Err(message) = conn.execute_raw(statement) {
                let _ = conn.execute_raw("ROLLBACK");
                return Err(MigrationError::ddl(statement.clone(), message, completed));
            }
        }
        conn.execute("COMMIT")?;

        Ok(statements.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::SchemaInspector;
    use crate::migration::MigrationOperation;
    use dataflow_schema::{ColumnDefinition as Col, ScalarType, TableDefinition};
    use tempfile::TempDir;

    fn file_url(dir: &TempDir) -> String {
        format!("sqlite://{}", dir.path().join("app.db").display())
    }

    fn users_migration() -> Migration {
        Migration::new(
            "auto_20260101000000",
            vec![MigrationOperation::CreateTable {
                table: TableDefinition::new("users")
                    .with_column(Col::new("id", ScalarType::Int).primary_key())
                    .with_column(Col::new("email", ScalarType::Str).unique()),
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_execute_applies_and_records() {
        let dir = TempDir::new().unwrap();
        let executor = DdlExecutor::new(&file_url(&dir)).unwrap();

        let result = executor.execute(&users_migration()).unwrap();
        assert!(!result.skipped);
        assert_eq!(result.statements_executed, 1);

        let schema = SchemaInspector::new(&file_url(&dir))
            .unwrap()
            .get_current_schema()
            .unwrap();
        assert!(schema.contains_table("users"));
    }

    #[test]
    fn test_second_execute_is_checksum_noop() {
        let dir = TempDir::new().unwrap();
        let executor = DdlExecutor::new(&file_url(&dir)).unwrap();
        let migration = users_migration();

        executor.execute(&migration).unwrap();
        let second = executor.execute(&migration).unwrap();
        assert!(second.skipped);
        assert_eq!(second.statements_executed, 0);
        assert!(second.summary().contains("skipped"));
    }

    #[test]
    fn test_same_version_different_checksum_is_drift() {
        let dir = TempDir::new().unwrap();
        let executor = DdlExecutor::new(&file_url(&dir)).unwrap();

        executor.execute(&users_migration()).unwrap();

        let drifted = Migration::new(
            "auto_20260101000000",
            vec![MigrationOperation::CreateTable {
                table: TableDefinition::new("accounts")
                    .with_column(Col::new("id", ScalarType::Int).primary_key()),
            }],
        )
        .unwrap();

        let err = executor.execute(&drifted).unwrap_err();
        assert!(matches!(err, MigrationError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_failed_batch_rolls_back_entirely() {
        let dir = TempDir::new().unwrap();
        let url = file_url(&dir);
        let executor = DdlExecutor::new(&url).unwrap();

        let statements = vec![
            "CREATE TABLE a (id INTEGER PRIMARY KEY);".to_string(),
            "THIS IS NOT SQL;".to_string(),
            "CREATE TABLE b (id INTEGER PRIMARY KEY);".to_string(),
        ];

        let err = executor.execute_ddl_batch(&statements).unwrap_err();
        match err {
            MigrationError::DdlExecution { completed, .. } => assert_eq!(completed, 1),
            other => panic!("expected DdlExecution, got {other:?}"),
        }

        // Re-inspect: the first statement must not have survived.
        let schema = SchemaInspector::new(&url).unwrap().get_current_schema().unwrap();
        assert!(!schema.contains_table("a"));
        assert!(!schema.contains_table("b"));
    }

    #[test]
    fn test_successful_batch_reports_count() {
        let dir = TempDir::new().unwrap();
        let executor = DdlExecutor::new(&file_url(&dir)).unwrap();

        let statements = vec![
            "CREATE TABLE a (id INTEGER PRIMARY KEY);".to_string(),
            "CREATE TABLE b (id INTEGER PRIMARY KEY);".to_string(),
        ];
        assert_eq!(executor.execute_ddl_batch(&statements).unwrap(), 2);
    }

    #[test]
    fn test_memory_database_accepted_for_execution() {
        let executor = DdlExecutor::new(":memory:").unwrap();
        let result = executor.execute(&users_migration()).unwrap();
        assert!(!result.skipped);
    }

    #[test]
    fn test_failed_migration_leaves_no_record() {
        let dir = TempDir::new().unwrap();
        let url = file_url(&dir);
        let executor = DdlExecutor::new(&url).unwrap();

        // Create "users" first so the migration's CREATE TABLE collides.
        executor
            .execute_ddl_batch(&["CREATE TABLE users (id INTEGER);".to_string()])
            .unwrap();

        let err = executor.execute(&users_migration()).unwrap_err();
        assert!(matches!(err, MigrationError::DdlExecution { .. }));

        // The checksum must not have been recorded.
        let second = executor.execute(&users_migration()).unwrap_err();
        assert!(matches!(second, MigrationError::DdlExecution { .. }));
    }
}
