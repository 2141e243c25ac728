//! Error types for the migration engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The database cannot be introspected: unsupported scheme, document
    /// store, or an in-memory database with no persistent catalog.
    #[error("schema discovery failed: {0}")]
    SchemaDiscovery(String),

    /// The model declares a change that is type-incompatible with live data.
    #[error(
        "incompatible schema: column '{table}.{column}' is declared as {model_type} but the \
         database holds {db_type}"
    )]
    SchemaIncompatible {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Type declared by the model.
        model_type: String,
        /// Type found in the database.
        db_type: String,
    },

    /// The migration lock was not obtained within the timeout.
    #[error("failed to acquire migration lock for '{database}' within {waited:?}")]
    LockTimeout {
        /// Database the lock targets.
        database: String,
        /// How long acquisition was attempted.
        waited: Duration,
    },

    /// A DDL statement failed. The transaction has been rolled back.
    #[error("DDL failed after {completed} statement(s), on `{statement}`: {message}")]
    DdlExecution {
        /// The statement that failed.
        statement: String,
        /// Database error text.
        message: String,
        /// Statements completed before the failure (diagnostics only; a
        /// failed batch restarts from scratch).
        completed: usize,
    },

    /// A migration with this version is recorded with a different checksum.
    /// Signals drift between two code versions targeting the same database.
    #[error("checksum mismatch for migration '{version}': recorded {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Migration version.
        version: String,
        /// Checksum in the history table.
        expected: String,
        /// Checksum of the migration at hand.
        actual: String,
    },

    /// The dialect cannot express this operation.
    #[error("{dialect} does not support: {operation}")]
    UnsupportedOperation {
        /// Dialect name.
        dialect: String,
        /// Description of the operation.
        operation: String,
    },

    /// Interactive confirmation was declined.
    #[error("migration declined by operator")]
    ConfirmationDeclined,

    /// Invalid configuration or database URL.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to connect to or talk to the database.
    #[error("database connection error: {0}")]
    Connection(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Create a schema discovery error.
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::SchemaDiscovery(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a DDL execution error.
    pub fn ddl(statement: impl Into<String>, message: impl Into<String>, completed: usize) -> Self {
        Self::DdlExecution {
            statement: statement.into(),
            message: message.into(),
            completed,
        }
    }

    /// Create an incompatible-schema error.
    pub fn incompatible(
        table: impl Into<String>,
        column: impl Into<String>,
        model_type: impl Into<String>,
        db_type: impl Into<String>,
    ) -> Self {
        Self::SchemaIncompatible {
            table: table.into(),
            column: column.into(),
            model_type: model_type.into(),
            db_type: db_type.into(),
        }
    }

    /// Check if this error is recoverable by retrying later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

impl From<dataflow_schema::SchemaError> for MigrationError {
    fn from(err: dataflow_schema::SchemaError) -> Self {
        Self::SchemaDiscovery(err.to_string())
    }
}
