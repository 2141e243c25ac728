//! Table, column, and schema definitions.
//!
//! These are the value objects the migration engine operates on. A
//! [`DatabaseSchema`] is produced either by introspecting a live database
//! or by a model-declaration layer describing the desired structure; both
//! sides meet in the comparator as the same shape.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::types::ScalarType;

/// A single column's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Normalized type.
    pub ty: ScalarType,
    /// Whether NULL values are allowed.
    pub nullable: bool,
    /// Default value expression, verbatim from the catalog or the model.
    pub default: Option<String>,
    /// Whether this column is part of the primary key.
    pub primary_key: bool,
    /// Whether this column carries a single-column unique constraint.
    pub unique: bool,
}

impl ColumnDefinition {
    /// Create a required (non-null) column with no default.
    pub fn new(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    /// Allow NULL values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the default value expression.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Mark this column as part of the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark this column as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A foreign-key reference from one column to another table's column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name, when the catalog exposes one.
    pub name: Option<String>,
    /// Referencing column in this table.
    pub column: String,
    /// Referenced table.
    pub target_table: String,
    /// Referenced column.
    pub target_column: String,
}

impl ForeignKey {
    /// Create an unnamed foreign key.
    pub fn new(
        column: impl Into<String>,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            column: column.into(),
            target_table: target_table.into(),
            target_column: target_column.into(),
        }
    }

    /// Set the constraint name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexDefinition {
    /// Create a non-unique index.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// One table's complete shape at a point in time.
///
/// Columns are ordered and keyed by name; names are unique within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    columns: IndexMap<String, ColumnDefinition>,
    /// Foreign keys declared on this table.
    pub foreign_keys: Vec<ForeignKey>,
    /// Secondary indexes on this table.
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Add a column, failing on a duplicate name.
    pub fn add_column(&mut self, column: ColumnDefinition) -> SchemaResult<()> {
        if self.columns.contains_key(&column.name) {
            return Err(SchemaError::duplicate_column(&self.name, &column.name));
        }
        self.columns.insert(column.name.clone(), column);
        Ok(())
    }

    /// Builder-style column addition. Panics on duplicates in debug builds;
    /// use [`TableDefinition::add_column`] when the input is untrusted.
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        debug_assert!(
            !self.columns.contains_key(&column.name),
            "duplicate column '{}' in table '{}'",
            column.name,
            self.name
        );
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Builder-style foreign key addition.
    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Builder-style index addition.
    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.get(name)
    }

    /// Iterate columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.values()
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Names of primary key columns, in declaration order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .values()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// A full database snapshot: tables keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    tables: IndexMap<String, TableDefinition>,
}

impl DatabaseSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, failing on a duplicate name.
    pub fn add_table(&mut self, table: TableDefinition) -> SchemaResult<()> {
        if self.tables.contains_key(&table.name) {
            return Err(SchemaError::DuplicateTable(table.name));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Builder-style table addition.
    pub fn with_table(mut self, table: TableDefinition) -> Self {
        debug_assert!(
            !self.tables.contains_key(&table.name),
            "duplicate table '{}'",
            table.name
        );
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    /// Whether a table with this name exists.
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Iterate tables in insertion order.
    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }

    /// Table names in insertion order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Whether the schema has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_table() -> TableDefinition {
        TableDefinition::new("users")
            .with_column(ColumnDefinition::new("id", ScalarType::Int).primary_key())
            .with_column(ColumnDefinition::new("email", ScalarType::Str).unique())
            .with_column(ColumnDefinition::new("name", ScalarType::Str).nullable())
    }

    #[test]
    fn test_column_lookup_and_order() {
        let table = users_table();
        assert_eq!(table.column_count(), 3);
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["id", "email", "name"]
        );
        assert!(table.column("email").unwrap().unique);
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut table = users_table();
        let err = table
            .add_column(ColumnDefinition::new("email", ScalarType::Str))
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));
    }

    #[test]
    fn test_primary_key_columns() {
        let table = users_table();
        assert_eq!(table.primary_key_columns(), vec!["id"]);
    }

    #[test]
    fn test_schema_table_lookup() {
        let schema = DatabaseSchema::new().with_table(users_table());
        assert!(schema.contains_table("users"));
        assert_eq!(schema.table_count(), 1);
        assert_eq!(schema.table("users").unwrap().column_count(), 3);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut schema = DatabaseSchema::new().with_table(users_table());
        let err = schema.add_table(TableDefinition::new("users")).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTable(_)));
    }

    #[test]
    fn test_foreign_key_builder() {
        let table = TableDefinition::new("orders")
            .with_column(ColumnDefinition::new("id", ScalarType::Int).primary_key())
            .with_column(ColumnDefinition::new("user_id", ScalarType::Int))
            .with_foreign_key(ForeignKey::new("user_id", "users", "id").named("orders_user_fk"));

        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].target_table, "users");
        assert_eq!(table.foreign_keys[0].name.as_deref(), Some("orders_user_fk"));
    }

    #[test]
    fn test_serde_preserves_column_order() {
        let table = users_table();
        let json = serde_json::to_string(&table).unwrap();
        let back: TableDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.column_names().collect::<Vec<_>>(),
            table.column_names().collect::<Vec<_>>()
        );
    }
}
