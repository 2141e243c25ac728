//! Schema comparison.
//!
//! The comparator diffs a declared model schema against a live database
//! snapshot. Its core rule is *subset compatibility*: a database table is
//! compatible with a model table when every declared column exists in the
//! database with a compatible type. The database may carry additional
//! columns the model never mentions; legacy tables stay untouched and no
//! drop is ever inferred from their presence.

use std::collections::HashMap;

use dataflow_schema::{
    ColumnDefinition, DatabaseSchema, ForeignKey, IndexDefinition, ScalarType, TableDefinition,
    table_fingerprint,
};
use tracing::debug;

use crate::config::DEFAULT_MAX_SCHEMA_SIZE;
use crate::error::MigrateResult;

/// A column the model declares that the database lacks.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAddition {
    /// Table name.
    pub table: String,
    /// The declared column.
    pub column: ColumnDefinition,
}

/// A shared column whose database type does not match the declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAlteration {
    /// Table name.
    pub table: String,
    /// The declared column (target shape).
    pub column: ColumnDefinition,
    /// The type currently held by the database.
    pub db_type: ScalarType,
}

/// A column present only in the database of an otherwise-changed table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRemoval {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
}

/// A foreign key to add to an existing table.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyAddition {
    /// Table name.
    pub table: String,
    /// The foreign key.
    pub foreign_key: ForeignKey,
}

/// A foreign key that must be dropped before its target table can go.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyRemoval {
    /// Table carrying the constraint.
    pub table: String,
    /// The foreign key.
    pub foreign_key: ForeignKey,
}

/// An index to create on an existing table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexAddition {
    /// Table name.
    pub table: String,
    /// The index.
    pub index: IndexDefinition,
}

/// The structural differences between a model schema and a database.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    /// Tables the model declares that do not exist in the database.
    pub create_tables: Vec<TableDefinition>,
    /// Declared columns missing from existing tables.
    pub add_columns: Vec<ColumnAddition>,
    /// Shared columns with incompatible types.
    pub alter_columns: Vec<ColumnAlteration>,
    /// Foreign keys for columns being added to existing tables.
    pub add_foreign_keys: Vec<ForeignKeyAddition>,
    /// Indexes to create on existing tables.
    pub create_indexes: Vec<IndexAddition>,
    /// Database-only tables. Destructive candidates; emitted as operations
    /// only when the generator allows destructive output.
    pub drop_tables: Vec<String>,
    /// Database-only columns in tables that are otherwise being changed.
    /// Destructive candidates, same gating as `drop_tables`.
    pub drop_columns: Vec<ColumnRemoval>,
    /// Foreign keys on surviving tables that reference a dropped table.
    pub drop_foreign_keys: Vec<ForeignKeyRemoval>,
}

impl SchemaDiff {
    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.create_tables.is_empty()
            && self.add_columns.is_empty()
            && self.alter_columns.is_empty()
            && self.add_foreign_keys.is_empty()
            && self.create_indexes.is_empty()
            && self.drop_tables.is_empty()
            && self.drop_columns.is_empty()
            && self.drop_foreign_keys.is_empty()
    }

    /// Whether the diff contains destructive candidates.
    pub fn has_destructive(&self) -> bool {
        !self.drop_tables.is_empty() || !self.drop_columns.is_empty()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.create_tables.is_empty() {
            parts.push(format!("create {} tables", self.create_tables.len()));
        }
        if !self.add_columns.is_empty() {
            parts.push(format!("add {} columns", self.add_columns.len()));
        }
        if !self.alter_columns.is_empty() {
            parts.push(format!("alter {} columns", self.alter_columns.len()));
        }
        if !self.add_foreign_keys.is_empty() {
            parts.push(format!("add {} foreign keys", self.add_foreign_keys.len()));
        }
        if !self.create_indexes.is_empty() {
            parts.push(format!("create {} indexes", self.create_indexes.len()));
        }
        if !self.drop_tables.is_empty() {
            parts.push(format!("drop {} tables", self.drop_tables.len()));
        }
        if !self.drop_columns.is_empty() {
            parts.push(format!("drop {} columns", self.drop_columns.len()));
        }

        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Check whether a database table satisfies a model table.
///
/// Every column the model declares must exist in the database with a
/// compatible type. Extra database columns are allowed; this is a subset
/// rule, not structural equality.
pub fn schemas_are_compatible(db_table: &TableDefinition, model_table: &TableDefinition) -> bool {
    model_table.columns().all(|declared| {
        db_table
            .column(&declared.name)
            .is_some_and(|held| held.ty == declared.ty)
    })
}

/// Per-table comparison outcome, cached under its fingerprint pair.
#[derive(Debug, Clone, Default)]
struct TableOutcome {
    add_columns: Vec<ColumnDefinition>,
    alter_columns: Vec<(ColumnDefinition, ScalarType)>,
    add_foreign_keys: Vec<ForeignKey>,
    drop_columns: Vec<String>,
}

impl TableOutcome {
    fn is_clean(&self) -> bool {
        self.add_columns.is_empty() && self.alter_columns.is_empty()
    }
}

#[derive(Debug, Clone)]
struct CachedComparison {
    model_fp: String,
    db_fp: String,
    outcome: TableOutcome,
}

/// Compares schemas, with a per-instance fingerprint cache.
///
/// The cache skips the column-by-column walk for tables whose model and
/// database fingerprints are unchanged since the previous comparison. It is
/// disabled entirely once either schema exceeds `max_schema_size` tables,
/// bounding memory growth on very large catalogs.
#[derive(Debug)]
pub struct SchemaComparator {
    cache: HashMap<String, CachedComparison>,
    max_schema_size: usize,
    cache_hits: u64,
    cache_misses: u64,
}

impl Default for SchemaComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaComparator {
    /// Create a comparator with the default cache size guard.
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            max_schema_size: DEFAULT_MAX_SCHEMA_SIZE,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    /// Set the table-count bound above which fingerprint caching is off.
    pub fn with_max_schema_size(mut self, max: usize) -> Self {
        self.max_schema_size = max;
        self
    }

    /// Number of table comparisons served from the fingerprint cache.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    /// Number of table comparisons computed in full.
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses
    }

    /// Compare a model schema against a database snapshot.
    pub fn compare(
        &mut self,
        model_schema: &DatabaseSchema,
        db_schema: &DatabaseSchema,
    ) -> MigrateResult<SchemaDiff> {
        let mut diff = SchemaDiff::default();

        let caching = model_schema.table_count().max(db_schema.table_count())
            <= self.max_schema_size;
        if !caching && !self.cache.is_empty() {
            debug!(
                max_schema_size = self.max_schema_size,
                "schema exceeds fingerprint cache bound, comparing everything in full"
            );
            self.cache.clear();
        }

        for model_table in model_schema.tables() {
            let Some(db_table) = db_schema.table(&model_table.name) else {
                diff.create_tables.push(model_table.clone());
                continue;
            };

            let outcome = if caching {
                self.cached_outcome(model_table, db_table)
            } else {
                compare_tables(model_table, db_table)
            };

            for column in outcome.add_columns {
                diff.add_columns.push(ColumnAddition {
                    table: model_table.name.clone(),
                    column,
                });
            }
            for (column, db_type) in outcome.alter_columns {
                diff.alter_columns.push(ColumnAlteration {
                    table: model_table.name.clone(),
                    column,
                    db_type,
                });
            }
            for foreign_key in outcome.add_foreign_keys {
                diff.add_foreign_keys.push(ForeignKeyAddition {
                    table: model_table.name.clone(),
                    foreign_key,
                });
            }
            for column in outcome.drop_columns {
                diff.drop_columns.push(ColumnRemoval {
                    table: model_table.name.clone(),
                    column,
                });
            }
        }

        // Database-only tables are drop candidates; constraints pointing at
        // them from surviving tables must go first.
        for db_table in db_schema.tables() {
            if model_schema.contains_table(&db_table.name) {
                continue;
            }
            for survivor in db_schema.tables() {
                if model_schema.contains_table(&survivor.name) {
                    for fk in &survivor.foreign_keys {
                        if fk.target_table == db_table.name {
                            diff.drop_foreign_keys.push(ForeignKeyRemoval {
                                table: survivor.name.clone(),
                                foreign_key: fk.clone(),
                            });
                        }
                    }
                }
            }
            diff.drop_tables.push(db_table.name.clone());
        }

        debug!(summary = %diff.summary(), "schema comparison complete");
        Ok(diff)
    }

    fn cached_outcome(
        &mut self,
        model_table: &TableDefinition,
        db_table: &TableDefinition,
    ) -> TableOutcome {
        let model_fp = table_fingerprint(model_table);
        let db_fp = table_fingerprint(db_table);

        if let Some(cached) = self.cache.get(&model_table.name) {
            if cached.model_fp == model_fp && cached.db_fp == db_fp {
                self.cache_hits += 1;
                return cached.outcome.clone();
            }
        }

        self.cache_misses += 1;
        let outcome = compare_tables(model_table, db_table);
        self.cache.insert(
            model_table.name.clone(),
            CachedComparison {
                model_fp,
                db_fp,
                outcome: outcome.clone(),
            },
        );
        outcome
    }
}

/// Column-by-column comparison of one table pair.
fn compare_tables(model_table: &TableDefinition, db_table: &TableDefinition) -> TableOutcome {
    if schemas_are_compatible(db_table, model_table) {
        // Subset rule: compatible tables produce nothing, even when the
        // database carries columns the model never declared.
        return TableOutcome::default();
    }

    let mut outcome = TableOutcome::default();

    for declared in model_table.columns() {
        match db_table.column(&declared.name) {
            None => {
                outcome.add_columns.push(declared.clone());
                for fk in &model_table.foreign_keys {
                    if fk.column == declared.name {
                        outcome.add_foreign_keys.push(fk.clone());
                    }
                }
            }
            Some(held) if held.ty != declared.ty => {
                outcome.alter_columns.push((declared.clone(), held.ty));
            }
            Some(_) => {}
        }
    }

    // Only a table already being changed surfaces its database-only columns
    // as drop candidates.
    for held in db_table.columns() {
        if model_table.column(&held.name).is_none() {
            outcome.drop_columns.push(held.name.clone());
        }
    }

    outcome
}
