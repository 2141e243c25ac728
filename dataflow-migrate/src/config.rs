//! Database URL parsing and engine configuration.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{MigrateResult, MigrationError};

/// Default timeout for migration lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default poll interval while waiting for the migration lock.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default name of the migration history table.
pub const DEFAULT_HISTORY_TABLE: &str = "dataflow_migrations";

/// Default table-count bound above which the comparator's fingerprint
/// cache is disabled.
pub const DEFAULT_MAX_SCHEMA_SIZE: usize = 256;

/// The kind of database a URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseKind {
    /// PostgreSQL.
    Postgres,
    /// MySQL.
    MySql,
    /// File-backed SQLite.
    Sqlite {
        /// Path to the database file.
        path: String,
    },
    /// In-memory SQLite. Accepted for DDL execution within one connection's
    /// lifetime, rejected for schema discovery.
    SqliteMemory,
}

/// A parsed database URL.
#[derive(Debug, Clone)]
pub struct DatabaseUrl {
    /// The raw URL as given by the caller.
    pub raw: String,
    /// What kind of database it points at.
    pub kind: DatabaseKind,
}

impl DatabaseUrl {
    /// Parse a database URL.
    ///
    /// Supported schemes: `postgresql://` (and `postgres://`), `mysql://`,
    /// `sqlite://path`, `sqlite:///absolute/path.db`, and the in-memory
    /// spellings `sqlite::memory:` / `:memory:`.
    pub fn parse(raw: impl Into<String>) -> MigrateResult<Self> {
        let raw = raw.into();

        if raw == ":memory:" || raw == "sqlite::memory:" {
            return Ok(Self {
                raw,
                kind: DatabaseKind::SqliteMemory,
            });
        }

        if let Some(rest) = raw.strip_prefix("sqlite://") {
            let path = rest.split('?').next().unwrap_or(rest);
            if path.is_empty() {
                return Err(MigrationError::config("sqlite URL is missing a path"));
            }
            if path == ":memory:" {
                return Ok(Self {
                    raw,
                    kind: DatabaseKind::SqliteMemory,
                });
            }
            return Ok(Self {
                kind: DatabaseKind::Sqlite {
                    path: path.to_string(),
                },
                raw,
            });
        }

        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let path = rest.split('?').next().unwrap_or(rest);
            if path == ":memory:" {
                return Ok(Self {
                    raw,
                    kind: DatabaseKind::SqliteMemory,
                });
            }
            if path.is_empty() {
                return Err(MigrationError::config("sqlite URL is missing a path"));
            }
            return Ok(Self {
                kind: DatabaseKind::Sqlite {
                    path: path.to_string(),
                },
                raw,
            });
        }

        let parsed = url::Url::parse(&raw)
            .map_err(|e| MigrationError::config(format!("invalid database URL: {e}")))?;

        let kind = match parsed.scheme() {
            "postgresql" | "postgres" => DatabaseKind::Postgres,
            "mysql" => DatabaseKind::MySql,
            other => {
                return Err(MigrationError::discovery(format!(
                    "unsupported database type '{other}'"
                )));
            }
        };

        Ok(Self { raw, kind })
    }

    /// Whether this URL points at an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self.kind, DatabaseKind::SqliteMemory)
    }

    /// A stable 63-bit key derived from the URL, used to namespace advisory
    /// locks. Identical across processes for identical URLs.
    pub fn lock_key(&self) -> i64 {
        let digest = Sha256::digest(self.raw.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        // Mask the sign bit so the key is valid for every backend.
        (i64::from_be_bytes(bytes)) & i64::MAX
    }

    /// A lock name for backends that take string-named locks.
    pub fn lock_name(&self) -> String {
        format!("dataflow_migrate_{:016x}", self.lock_key())
    }
}

/// Configuration for the auto-migration system.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Target database URL.
    pub database_url: String,
    /// How long to wait for the migration lock.
    pub lock_timeout: Duration,
    /// Poll interval while waiting for the lock.
    pub lock_poll_interval: Duration,
    /// Whether destructive operations (DROP TABLE / DROP COLUMN) may be
    /// generated. Off by default; additive migrations only.
    pub allow_destructive: bool,
    /// Whether a type-incompatible shared column fails the run at
    /// comparison time. When false the mismatch becomes an ALTER COLUMN.
    pub fail_on_incompatible: bool,
    /// Name of the migration history table.
    pub history_table: String,
    /// Table-count bound above which fingerprint caching is disabled.
    pub max_schema_size: usize,
    /// TTL for cached schema snapshots.
    pub cache_ttl: Duration,
    /// Maximum number of cached schema snapshots.
    pub cache_max_size: usize,
}

impl MigrationConfig {
    /// Create a configuration for the given database URL with defaults.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            allow_destructive: false,
            fail_on_incompatible: true,
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            max_schema_size: DEFAULT_MAX_SCHEMA_SIZE,
            cache_ttl: dataflow_schema::cache::DEFAULT_TTL,
            cache_max_size: dataflow_schema::cache::DEFAULT_MAX_SIZE,
        }
    }

    /// Set the lock acquisition timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the lock poll interval.
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Allow destructive operations.
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    /// Set whether incompatible columns fail at comparison time.
    pub fn fail_on_incompatible(mut self, fail: bool) -> Self {
        self.fail_on_incompatible = fail;
        self
    }

    /// Set the history table name.
    pub fn history_table(mut self, name: impl Into<String>) -> Self {
        self.history_table = name.into();
        self
    }

    /// Set the fingerprint-cache size guard.
    pub fn max_schema_size(mut self, max: usize) -> Self {
        self.max_schema_size = max;
        self
    }

    /// Set the snapshot cache TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_postgres() {
        let parsed = DatabaseUrl::parse("postgresql://user:pw@localhost:5432/app").unwrap();
        assert_eq!(parsed.kind, DatabaseKind::Postgres);

        let parsed = DatabaseUrl::parse("postgres://localhost/app").unwrap();
        assert_eq!(parsed.kind, DatabaseKind::Postgres);
    }

    #[test]
    fn test_parse_mysql() {
        let parsed = DatabaseUrl::parse("mysql://root@127.0.0.1/app").unwrap();
        assert_eq!(parsed.kind, DatabaseKind::MySql);
    }

    #[test]
    fn test_parse_sqlite_file() {
        let parsed = DatabaseUrl::parse("sqlite://./app.db").unwrap();
        assert_eq!(
            parsed.kind,
            DatabaseKind::Sqlite {
                path: "./app.db".into()
            }
        );

        let parsed = DatabaseUrl::parse("sqlite:///var/data/app.db").unwrap();
        assert_eq!(
            parsed.kind,
            DatabaseKind::Sqlite {
                path: "/var/data/app.db".into()
            }
        );
    }

    #[test]
    fn test_parse_sqlite_memory() {
        for spelling in [":memory:", "sqlite::memory:", "sqlite://:memory:"] {
            let parsed = DatabaseUrl::parse(spelling).unwrap();
            assert!(parsed.is_memory(), "{spelling}");
        }
    }

    #[test]
    fn test_parse_unsupported_scheme() {
        let err = DatabaseUrl::parse("mongodb://localhost/app").unwrap_err();
        assert!(matches!(err, MigrationError::SchemaDiscovery(_)));
    }

    #[test]
    fn test_parse_garbage() {
        let err = DatabaseUrl::parse("not a url at all").unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_lock_key_is_stable_and_positive() {
        let a = DatabaseUrl::parse("postgresql://localhost/app").unwrap();
        let b = DatabaseUrl::parse("postgresql://localhost/app").unwrap();
        let c = DatabaseUrl::parse("postgresql://localhost/other").unwrap();

        assert_eq!(a.lock_key(), b.lock_key());
        assert_ne!(a.lock_key(), c.lock_key());
        assert!(a.lock_key() >= 0);
        assert!(a.lock_name().starts_with("dataflow_migrate_"));
    }

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::new("sqlite://app.db")
            .lock_timeout(Duration::from_secs(5))
            .allow_destructive(true)
            .fail_on_incompatible(false)
            .history_table("custom_history")
            .max_schema_size(32);

        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert!(config.allow_destructive);
        assert!(!config.fail_on_incompatible);
        assert_eq!(config.history_table, "custom_history");
        assert_eq!(config.max_schema_size, 32);
    }

    #[test]
    fn test_config_defaults() {
        let config = MigrationConfig::new("sqlite://app.db");
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        assert!(!config.allow_destructive);
        assert!(config.fail_on_incompatible);
        assert_eq!(config.history_table, DEFAULT_HISTORY_TABLE);
    }
}
