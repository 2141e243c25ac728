//! # dataflow-schema
//!
//! Structural schema model for the DataFlow migration engine.
//!
//! This crate provides:
//! - Column, table, and schema value objects ([`ColumnDefinition`],
//!   [`TableDefinition`], [`DatabaseSchema`])
//! - The portable scalar-type vocabulary and type-compatibility table
//! - Content fingerprints for change detection
//! - A TTL + LRU snapshot cache ([`SchemaCache`])
//!
//! ## Example
//!
//! ```rust
//! use dataflow_schema::{ColumnDefinition, DatabaseSchema, ScalarType, TableDefinition};
//!
//! let schema = DatabaseSchema::new().with_table(
//!     TableDefinition::new("customers")
//!         .with_column(ColumnDefinition::new("id", ScalarType::Int).primary_key())
//!         .with_column(ColumnDefinition::new("email", ScalarType::Str).unique())
//!         .with_column(ColumnDefinition::new("is_active", ScalarType::Bool).nullable()),
//! );
//!
//! assert!(schema.contains_table("customers"));
//! ```

pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod table;
pub mod types;

pub use cache::{CacheStats, SchemaCache};
pub use error::{SchemaError, SchemaResult};
pub use fingerprint::{schema_fingerprint, table_fingerprint};
pub use table::{ColumnDefinition, DatabaseSchema, ForeignKey, IndexDefinition, TableDefinition};
pub use types::{ScalarType, types_are_compatible};
