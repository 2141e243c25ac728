//! # dataflow-migrate
//!
//! Automatic schema migration engine for DataFlow.
//!
//! This crate provides functionality for:
//! - Live schema introspection across PostgreSQL, MySQL, and SQLite
//! - Subset-compatible schema comparison with fingerprint caching
//! - Dependency-ordered, additive-by-default migration generation
//! - Cross-process locking backed by the target database
//! - Checksum-idempotent, transactional DDL execution with a persistent
//!   history ledger
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ Declared     │────▶│ SchemaComparator │────▶│ MigrationGen     │
//! │ models       │     └──────────────────┘     └──────────────────┘
//! └──────────────┘              ▲                        │
//! ┌──────────────┐              │                        ▼
//! │ Live database│──inspect─────┘               ┌──────────────────┐
//! └──────────────┘                              │ lock ▸ execute   │
//!        ▲                                      │ ▸ record ▸ unlock│
//!        └──────────────────────────────────────┴──────────────────┘
//! ```
//!
//! The executor runs on a dedicated synchronous connection and tracks
//! applied migrations in a `dataflow_migrations` table, so calling
//! [`auto_migrate`] repeatedly, or from several application instances at
//! once, converges on a single application of each change.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dataflow_migrate::{MigrateOptions, auto_migrate};
//! use dataflow_schema::{ColumnDefinition, DatabaseSchema, ScalarType, TableDefinition};
//!
//! fn main() -> Result<(), dataflow_migrate::MigrationError> {
//!     let models = DatabaseSchema::new().with_table(
//!         TableDefinition::new("customers")
//!             .with_column(ColumnDefinition::new("id", ScalarType::Int).primary_key())
//!             .with_column(ColumnDefinition::new("email", ScalarType::Str).unique()),
//!     );
//!
//!     let outcome = auto_migrate(
//!         "sqlite://./app.db",
//!         &models,
//!         &MigrateOptions::new(),
//!     )?;
//!     println!("{}", outcome.summary());
//!     Ok(())
//! }
//! ```
//!
//! Async callers must not block their runtime on these entry points; the
//! [`nonblocking`] module wraps them in `spawn_blocking`.

pub mod config;
pub mod conn;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod introspect;
pub mod lock;
pub mod migration;
pub mod sql;

// Re-exports
pub use config::{DatabaseKind, DatabaseUrl, MigrationConfig};
pub use diff::{SchemaComparator, SchemaDiff, schemas_are_compatible};
pub use engine::{
    AutoMigrationSystem, ConfirmationPrompt, MigrateOptions, MigrationOutcome, MigrationPhase,
    StdinPrompt,
};
pub use error::{MigrateResult, MigrationError};
pub use executor::{DdlExecutor, MigrationResult};
pub use history::MigrationRecord;
pub use introspect::SchemaInspector;
pub use lock::{LockHandle, MigrationLockManager};
pub use migration::{Migration, MigrationGenerator, MigrationOperation, compute_checksum};
pub use sql::{Dialect, SqlGenerator};

use dataflow_schema::DatabaseSchema;

/// Migrate a database to match the declared models.
///
/// Inspects the live schema, compares, generates, and applies in one call.
/// See [`AutoMigrationSystem`] for per-run configuration beyond
/// [`MigrateOptions`].
pub fn auto_migrate(
    database_url: &str,
    model_schema: &DatabaseSchema,
    options: &MigrateOptions,
) -> MigrateResult<MigrationOutcome> {
    AutoMigrationSystem::new(database_url).auto_migrate(model_schema, options)
}

/// Take a structural snapshot of a live database.
pub fn get_current_schema(database_url: &str) -> MigrateResult<DatabaseSchema> {
    SchemaInspector::new(database_url)?.get_current_schema()
}

/// Compare a model schema against a database snapshot.
pub fn compare_schemas(
    model_schema: &DatabaseSchema,
    db_schema: &DatabaseSchema,
) -> MigrateResult<SchemaDiff> {
    SchemaComparator::new().compare(model_schema, db_schema)
}

/// Async-friendly wrappers.
///
/// The migration core blocks by design; these functions offload it onto
/// the tokio blocking pool so an async caller's event loop never stalls
/// and never shares connection state with DDL execution.
pub mod nonblocking {
    use dataflow_schema::DatabaseSchema;

    use crate::engine::{MigrateOptions, MigrationOutcome};
    use crate::error::{MigrateResult, MigrationError};

    /// [`crate::auto_migrate`] on the blocking pool.
    pub async fn auto_migrate(
        database_url: String,
        model_schema: DatabaseSchema,
        options: MigrateOptions,
    ) -> MigrateResult<MigrationOutcome> {
        tokio::task::spawn_blocking(move || {
            crate::auto_migrate(&database_url, &model_schema, &options)
        })
        .await
        .map_err(|e| MigrationError::config(format!("migration task failed to join: {e}")))?
    }

    /// [`crate::get_current_schema`] on the blocking pool.
    pub async fn get_current_schema(database_url: String) -> MigrateResult<DatabaseSchema> {
        tokio::task::spawn_blocking(move || crate::get_current_schema(&database_url))
            .await
            .map_err(|e| MigrationError::config(format!("inspection task failed to join: {e}")))?
    }
}
