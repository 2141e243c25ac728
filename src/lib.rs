//! # DataFlow
//!
//! Model-driven database tooling with automatic schema migrations.
//!
//! This facade re-exports the two member crates:
//! - [`schema`] - column/table/schema value objects, the portable type
//!   vocabulary, fingerprints, and snapshot caching
//! - [`migrate`] - introspection, comparison, migration generation, and
//!   safe locked execution
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dataflow::migrate::{MigrateOptions, auto_migrate};
//! use dataflow::schema::{ColumnDefinition, DatabaseSchema, ScalarType, TableDefinition};
//!
//! fn main() -> Result<(), dataflow::migrate::MigrationError> {
//!     let models = DatabaseSchema::new().with_table(
//!         TableDefinition::new("customers")
//!             .with_column(ColumnDefinition::new("id", ScalarType::Int).primary_key())
//!             .with_column(ColumnDefinition::new("email", ScalarType::Str).unique()),
//!     );
//!
//!     let outcome = auto_migrate("sqlite://./app.db", &models, &MigrateOptions::new())?;
//!     println!("{}", outcome.summary());
//!     Ok(())
//! }
//! ```

pub use dataflow_migrate as migrate;
pub use dataflow_schema as schema;

// The common surface, flattened for convenience.
pub use dataflow_migrate::{
    AutoMigrationSystem, MigrateOptions, Migration, MigrationError, MigrationOutcome,
    auto_migrate, compare_schemas, get_current_schema,
};
pub use dataflow_schema::{ColumnDefinition, DatabaseSchema, ScalarType, TableDefinition};
