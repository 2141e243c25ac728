//! Migration operations and the migration generator.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use dataflow_schema::{ColumnDefinition, ForeignKey, IndexDefinition, ScalarType, TableDefinition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::diff::SchemaDiff;
use crate::error::{MigrateResult, MigrationError};

/// A single schema-changing operation.
///
/// Each variant carries everything needed to render dialect-specific DDL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOperation {
    /// Create a table with its columns, keys, and indexes.
    CreateTable {
        /// The full table shape.
        table: TableDefinition,
    },
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Add a column to an existing table.
    AddColumn {
        /// Table name.
        table: String,
        /// The new column.
        column: ColumnDefinition,
    },
    /// Change a column's type.
    AlterColumn {
        /// Table name.
        table: String,
        /// The target column shape.
        column: ColumnDefinition,
        /// The type being migrated away from.
        from: ScalarType,
    },
    /// Drop a column from an existing table.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// Add a foreign-key constraint to an existing table.
    AddConstraint {
        /// Table name.
        table: String,
        /// The foreign key.
        foreign_key: ForeignKey,
    },
    /// Drop a foreign-key constraint.
    DropConstraint {
        /// Table name.
        table: String,
        /// The foreign key.
        foreign_key: ForeignKey,
    },
    /// Create a secondary index.
    CreateIndex {
        /// Table name.
        table: String,
        /// The index.
        index: IndexDefinition,
    },
    /// Drop a secondary index.
    DropIndex {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
    },
}

impl MigrationOperation {
    /// The table this operation touches.
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table } => &table.name,
            Self::DropTable { table }
            | Self::AddColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::DropConstraint { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. } => table,
        }
    }

    /// Whether this operation can destroy data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::DropTable { .. } | Self::DropColumn { .. })
    }
}

/// An ordered sequence of operations with a version and content checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    /// Version identifier, typically timestamp-derived.
    pub version: String,
    /// Operations in application order.
    pub operations: Vec<MigrationOperation>,
    /// SHA-256 over the serialized operation sequence. A pure function of
    /// the operations: identical sequences hash identically in every
    /// process, which is what makes duplicate detection work across
    /// independent runs.
    pub checksum: String,
    /// When the migration was generated.
    pub created_at: DateTime<Utc>,
}

impl Migration {
    /// Create a migration, computing its checksum.
    pub fn new(
        version: impl Into<String>,
        operations: Vec<MigrationOperation>,
    ) -> MigrateResult<Self> {
        let checksum = compute_checksum(&operations)?;
        Ok(Self {
            version: version.into(),
            operations,
            checksum,
            created_at: Utc::now(),
        })
    }

    /// Whether the migration contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Verify the checksum matches the operations.
    pub fn verify_checksum(&self) -> bool {
        compute_checksum(&self.operations)
            .map(|computed| computed == self.checksum)
            .unwrap_or(false)
    }

    /// Get a short human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} operation(s), checksum {}",
            self.version,
            self.operations.len(),
            &self.checksum[..12.min(self.checksum.len())]
        )
    }
}

/// Compute the SHA-256 checksum of an operation sequence.
///
/// The serde rendering of the operations is the hash input; field order is
/// fixed by the type definitions, so the result is stable across processes.
pub fn compute_checksum(operations: &[MigrationOperation]) -> MigrateResult<String> {
    let serialized = serde_json::to_vec(operations)
        .map_err(|e| MigrationError::config(format!("migration serialization failed: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    Ok(hex::encode(hasher.finalize()))
}

/// Turns a schema diff into an ordered migration.
///
/// Ordering is dependency-safe rather than insertion-ordered: tables are
/// created before anything references them (topologically by foreign key
/// among the new tables), column and constraint additions follow, and on
/// the destructive path constraints are dropped before the tables they
/// reference. Destructive operations are only emitted when explicitly
/// enabled; the default output is purely additive.
#[derive(Debug, Default)]
pub struct MigrationGenerator {
    allow_destructive: bool,
}

impl MigrationGenerator {
    /// Create a generator with destructive output disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow destructive operations in the output.
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    /// Generate a migration from a diff.
    pub fn generate(&self, diff: &SchemaDiff) -> MigrateResult<Migration> {
        let mut operations = Vec::new();

        for table in order_by_dependency(&diff.create_tables) {
            operations.push(MigrationOperation::CreateTable {
                table: table.clone(),
            });
        }

        for addition in &diff.add_columns {
            operations.push(MigrationOperation::AddColumn {
                table: addition.table.clone(),
                column: addition.column.clone(),
            });
        }

        for alteration in &diff.alter_columns {
            operations.push(MigrationOperation::AlterColumn {
                table: alteration.table.clone(),
                column: alteration.column.clone(),
                from: alteration.db_type,
            });
        }

        for addition in &diff.add_foreign_keys {
            operations.push(MigrationOperation::AddConstraint {
                table: addition.table.clone(),
                foreign_key: addition.foreign_key.clone(),
            });
        }

        for addition in &diff.create_indexes {
            operations.push(MigrationOperation::CreateIndex {
                table: addition.table.clone(),
                index: addition.index.clone(),
            });
        }

        if self.allow_destructive {
            for removal in &diff.drop_foreign_keys {
                operations.push(MigrationOperation::DropConstraint {
                    table: removal.table.clone(),
                    foreign_key: removal.foreign_key.clone(),
                });
            }
            for removal in &diff.drop_columns {
                operations.push(MigrationOperation::DropColumn {
                    table: removal.table.clone(),
                    column: removal.column.clone(),
                });
            }
            for table in &diff.drop_tables {
                operations.push(MigrationOperation::DropTable {
                    table: table.clone(),
                });
            }
        } else if diff.has_destructive() {
            warn!(
                tables = diff.drop_tables.len(),
                columns = diff.drop_columns.len(),
                "destructive changes detected but not enabled, skipping drops"
            );
        }

        let version = format!("auto_{}", Utc::now().format("%Y%m%d%H%M%S"));
        Migration::new(version, operations)
    }
}

/// Order new tables so every foreign-key target precedes its referrer.
///
/// Only dependencies among the new tables matter; references to tables that
/// already exist impose no ordering. Cycles fall back to declaration order.
fn order_by_dependency(tables: &[TableDefinition]) -> Vec<&TableDefinition> {
    let by_name: HashMap<&str, &TableDefinition> =
        tables.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut in_degree: HashMap<&str, usize> =
        tables.iter().map(|t| (t.name.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for table in tables {
        for fk in &table.foreign_keys {
            let target = fk.target_table.as_str();
            if target != table.name && by_name.contains_key(target) {
                *in_degree.entry(table.name.as_str()).or_default() += 1;
                dependents.entry(target).or_default().push(&table.name);
            }
        }
    }

    let mut queue: VecDeque<&str> = tables
        .iter()
        .map(|t| t.name.as_str())
        .filter(|name| in_degree.get(name).copied().unwrap_or(0) == 0)
        .collect();

    let mut ordered = Vec::with_capacity(tables.len());
    let mut seen: HashSet<&str> = HashSet::new();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        if let Some(table) = by_name.get(name) {
            ordered.push(*table);
        }
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    if ordered.len() != tables.len() {
        warn!("circular foreign-key references among new tables, using declaration order");
        return tables.iter().collect();
    }

    ordered
}
