//! Content fingerprints for tables and schemas.
//!
//! A fingerprint is a SHA-256 hash over a canonical textual rendering of a
//! table's structure. The rendering is hand-built rather than serialized so
//! the hash input is deterministic by construction and identical across
//! processes.

use sha2::{Digest, Sha256};

use crate::table::{DatabaseSchema, TableDefinition};

/// Fingerprint a single table's structure.
pub fn table_fingerprint(table: &TableDefinition) -> String {
    let mut hasher = Sha256::new();
    write_table(&mut hasher, table);
    hex::encode(hasher.finalize())
}

/// Fingerprint a whole schema.
pub fn schema_fingerprint(schema: &DatabaseSchema) -> String {
    let mut hasher = Sha256::new();
    for table in schema.tables() {
        write_table(&mut hasher, table);
    }
    hex::encode(hasher.finalize())
}

fn write_table(hasher: &mut Sha256, table: &TableDefinition) {
    hasher.update(b"table:");
    hasher.update(table.name.as_bytes());
    for column in table.columns() {
        hasher.update(b"\x1fcol:");
        hasher.update(column.name.as_bytes());
        hasher.update(b":");
        hasher.update(column.ty.tag().as_bytes());
        hasher.update(if column.nullable { b"?1" } else { b"?0" });
        hasher.update(if column.primary_key { b"p1" } else { b"p0" });
        hasher.update(if column.unique { b"u1" } else { b"u0" });
        if let Some(default) = &column.default {
            hasher.update(b"d:");
            hasher.update(default.as_bytes());
        }
    }
    for fk in &table.foreign_keys {
        hasher.update(b"\x1ffk:");
        hasher.update(fk.column.as_bytes());
        hasher.update(b">");
        hasher.update(fk.target_table.as_bytes());
        hasher.update(b".");
        hasher.update(fk.target_column.as_bytes());
    }
    for index in &table.indexes {
        hasher.update(b"\x1fidx:");
        hasher.update(index.name.as_bytes());
        hasher.update(b":");
        hasher.update(index.columns.join(",").as_bytes());
        hasher.update(if index.unique { b"u1" } else { b"u0" });
    }
    hasher.update(b"\x1e");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDefinition;
    use crate::types::ScalarType;

    fn sample() -> TableDefinition {
        TableDefinition::new("customers")
            .with_column(ColumnDefinition::new("id", ScalarType::Int).primary_key())
            .with_column(ColumnDefinition::new("email", ScalarType::Str).unique())
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(table_fingerprint(&sample()), table_fingerprint(&sample()));
    }

    #[test]
    fn test_fingerprint_changes_with_structure() {
        let base = sample();
        let grown = sample().with_column(ColumnDefinition::new("active", ScalarType::Bool));
        assert_ne!(table_fingerprint(&base), table_fingerprint(&grown));
    }

    #[test]
    fn test_fingerprint_sees_nullability() {
        let required = TableDefinition::new("t")
            .with_column(ColumnDefinition::new("name", ScalarType::Str));
        let optional = TableDefinition::new("t")
            .with_column(ColumnDefinition::new("name", ScalarType::Str).nullable());
        assert_ne!(table_fingerprint(&required), table_fingerprint(&optional));
    }

    #[test]
    fn test_schema_fingerprint_covers_all_tables() {
        let one = DatabaseSchema::new().with_table(sample());
        let two = DatabaseSchema::new()
            .with_table(sample())
            .with_table(TableDefinition::new("orders"));
        assert_ne!(schema_fingerprint(&one), schema_fingerprint(&two));
    }
}
