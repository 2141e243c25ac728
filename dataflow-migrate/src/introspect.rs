//! Live database introspection.
//!
//! The inspector connects to a database, walks its catalog, and produces a
//! [`DatabaseSchema`] snapshot with native types normalized into the
//! portable vocabulary. It is strictly read-only and opens its own
//! connection per call, closing it before returning.

use std::collections::{HashMap, HashSet};

use dataflow_schema::{
    ColumnDefinition, DatabaseSchema, ForeignKey, IndexDefinition, ScalarType, TableDefinition,
};
use tracing::debug;

use crate::config::{DEFAULT_HISTORY_TABLE, DatabaseKind, DatabaseUrl};
use crate::conn::DbConnection;
use crate::error::{MigrateResult, MigrationError};
use crate::lock::LOCK_TABLE;

/// Inspects a live database and produces schema snapshots.
#[derive(Debug, Clone)]
pub struct SchemaInspector {
    url: DatabaseUrl,
    /// Catalog schema to inspect on PostgreSQL.
    database_schema: String,
    /// Tables never included in snapshots.
    exclude_tables: Vec<String>,
}

impl SchemaInspector {
    /// Create an inspector for a database URL.
    pub fn new(database_url: &str) -> MigrateResult<Self> {
        Ok(Self::from_url(DatabaseUrl::parse(database_url)?))
    }

    /// Create an inspector from an already-parsed URL.
    pub fn from_url(url: DatabaseUrl) -> Self {
        Self {
            url,
            database_schema: "public".to_string(),
            exclude_tables: vec![
                DEFAULT_HISTORY_TABLE.to_string(),
                LOCK_TABLE.to_string(),
            ],
        }
    }

    /// Set the catalog schema to inspect (PostgreSQL only).
    pub fn database_schema(mut self, schema: impl Into<String>) -> Self {
        self.database_schema = schema.into();
        self
    }

    /// Exclude an additional table from snapshots.
    pub fn exclude_table(mut self, name: impl Into<String>) -> Self {
        self.exclude_tables.push(name.into());
        self
    }

    fn should_include(&self, name: &str) -> bool {
        !self.exclude_tables.iter().any(|t| t == name)
    }

    /// Take a structural snapshot of the live database.
    ///
    /// In-memory SQLite is rejected: a fresh connection sees an empty
    /// private database, so there is no persistent catalog to introspect.
    pub fn get_current_schema(&self) -> MigrateResult<DatabaseSchema> {
        if matches!(self.url.kind, DatabaseKind::SqliteMemory) {
            return Err(MigrationError::discovery(
                "in-memory SQLite has no persistent catalog to introspect",
            ));
        }

        let mut conn = DbConnection::connect(&self.url)?;
        let schema = match &mut conn {
            DbConnection::Postgres(client) => self.snapshot_postgres(client)?,
            DbConnection::MySql(inner) => self.snapshot_mysql(inner)?,
            DbConnection::Sqlite(inner) => self.snapshot_sqlite(inner)?,
        };

        debug!(tables = schema.table_count(), "schema snapshot complete");
        Ok(schema)
    }

    fn snapshot_postgres(&self, client: &mut postgres::Client) -> MigrateResult<DatabaseSchema> {
        let mut schema = DatabaseSchema::new();
        let catalog = self.database_schema.as_str();

        let tables = client
            .query(postgres_queries::TABLES, &[&catalog])
            .map_err(|e| MigrationError::connection(e.to_string()))?;

        for table_row in tables {
            let table_name: String = table_row.get(0);
            if !self.should_include(&table_name) {
                continue;
            }
            let mut table = TableDefinition::new(&table_name);

            // Constraints drive the primary-key and unique flags, so they
            // are grouped before the column walk.
            let mut pk_columns: HashSet<String> = HashSet::new();
            let mut unique_columns: HashSet<String> = HashSet::new();
            let mut constraint_names: HashSet<String> = HashSet::new();
            let mut grouped: HashMap<String, ConstraintGroup> = HashMap::new();

            let constraints = client
                .query(postgres_queries::CONSTRAINTS, &[&catalog, &table_name])
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            for row in constraints {
                let name: String = row.get(0);
                let kind: String = row.get(1);
                let column: Option<String> = row.get(2);
                let referenced_table: Option<String> = row.get(3);
                let referenced_column: Option<String> = row.get(4);

                let group = grouped.entry(name).or_insert_with(|| ConstraintGroup {
                    kind,
                    columns: Vec::new(),
                    referenced_table,
                    referenced_column,
                });
                if let Some(column) = column {
                    if !group.columns.contains(&column) {
                        group.columns.push(column);
                    }
                }
            }

            for (name, group) in &grouped {
                match group.kind.as_str() {
                    "PRIMARY KEY" => pk_columns.extend(group.columns.iter().cloned()),
                    "UNIQUE" => {
                        constraint_names.insert(name.clone());
                        if group.columns.len() == 1 {
                            unique_columns.insert(group.columns[0].clone());
                        }
                    }
                    _ => {}
                }
            }

            let columns = client
                .query(postgres_queries::COLUMNS, &[&catalog, &table_name])
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            for row in columns {
                let column_name: String = row.get(0);
                let data_type: String = row.get(1);
                let udt_name: String = row.get(2);
                let nullable: bool = row.get(3);
                let default: Option<String> = row.get(4);

                let ty = normalize_type(
                    &table_name,
                    &column_name,
                    &[udt_name.as_str(), data_type.as_str()],
                )?;
                let mut column = ColumnDefinition::new(&column_name, ty);
                column.nullable = nullable;
                column.default = default;
                column.primary_key = pk_columns.contains(&column_name);
                column.unique = unique_columns.contains(&column_name);
                table.add_column(column)?;
            }

            for (name, group) in &grouped {
                if group.kind == "FOREIGN KEY" {
                    if let (Some(target_table), Some(target_column), Some(column)) = (
                        &group.referenced_table,
                        &group.referenced_column,
                        group.columns.first(),
                    ) {
                        table.foreign_keys.push(
                            ForeignKey::new(column, target_table, target_column)
                                .named(name.clone()),
                        );
                    }
                }
            }

            let indexes = client
                .query(postgres_queries::INDEXES, &[&catalog, &table_name])
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            for row in indexes {
                let index_name: String = row.get(0);
                let columns: Vec<String> = row.get(1);
                let is_unique: bool = row.get(2);
                let is_primary: bool = row.get(3);

                // Primary keys and unique constraints are already carried
                // on the columns; only standalone indexes are recorded.
                if is_primary || constraint_names.contains(&index_name) {
                    continue;
                }
                let mut index = IndexDefinition::new(index_name, columns);
                if is_unique {
                    index = index.unique();
                }
                table.indexes.push(index);
            }

            schema.add_table(table)?;
        }

        Ok(schema)
    }

    fn snapshot_mysql(&self, conn: &mut mysql::Conn) -> MigrateResult<DatabaseSchema> {
        use mysql::prelude::Queryable;

        let mut schema = DatabaseSchema::new();

        let tables: Vec<String> = conn
            .query(mysql_queries::TABLES)
            .map_err(|e| MigrationError::connection(e.to_string()))?;

        for table_name in tables {
            if !self.should_include(&table_name) {
                continue;
            }
            let mut table = TableDefinition::new(&table_name);
            let mut unique_columns: HashSet<String> = HashSet::new();

            let columns: Vec<(String, String, String, String, Option<String>, String)> = conn
                .exec(mysql_queries::COLUMNS, (table_name.as_str(),))
                .map_err(|e| MigrationError::connection(e.to_string()))?;

            for (column_name, data_type, column_type, is_nullable, default, column_key) in columns
            {
                // column_type carries display width, which is how MySQL
                // distinguishes tinyint(1) booleans and char(36) UUIDs.
                let ty = normalize_type(
                    &table_name,
                    &column_name,
                    &[column_type.as_str(), data_type.as_str()],
                )?;
                let mut column = ColumnDefinition::new(&column_name, ty);
                column.nullable = is_nullable == "YES";
                column.default = default;
                column.primary_key = column_key == "PRI";
                column.unique = column_key == "UNI";
                if column.unique {
                    unique_columns.insert(column_name.clone());
                }
                table.add_column(column)?;
            }

            let fks: Vec<(String, String, String, String)> = conn
                .exec(mysql_queries::FOREIGN_KEYS, (table_name.as_str(),))
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            let mut seen_constraints: HashSet<String> = HashSet::new();
            for (constraint_name, column, target_table, target_column) in fks {
                if seen_constraints.insert(constraint_name.clone()) {
                    table.foreign_keys.push(
                        ForeignKey::new(column, target_table, target_column)
                            .named(constraint_name),
                    );
                }
            }

            let index_rows: Vec<(String, i64, String)> = conn
                .exec(mysql_queries::INDEXES, (table_name.as_str(),))
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            let mut order: Vec<String> = Vec::new();
            let mut by_name: HashMap<String, IndexDefinition> = HashMap::new();
            for (index_name, non_unique, column) in index_rows {
                let entry = by_name.entry(index_name.clone()).or_insert_with(|| {
                    order.push(index_name.clone());
                    let index = IndexDefinition::new(index_name, Vec::new());
                    if non_unique == 0 { index.unique() } else { index }
                });
                entry.columns.push(column);
            }
            for name in order {
                if let Some(index) = by_name.remove(&name) {
                    // Unique single-column indexes merely back the UNI flag
                    // already set on the column.
                    if index.unique
                        && index.columns.len() == 1
                        && unique_columns.contains(&index.columns[0])
                    {
                        continue;
                    }
                    table.indexes.push(index);
                }
            }

            schema.add_table(table)?;
        }

        Ok(schema)
    }

    fn snapshot_sqlite(&self, conn: &mut rusqlite::Connection) -> MigrateResult<DatabaseSchema> {
        let mut schema = DatabaseSchema::new();

        let table_names: Vec<String> = {
            let mut stmt = conn
                .prepare(sqlite_queries::TABLES)
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| MigrationError::connection(e.to_string()))?;
            rows.collect::<Result<_, _>>()
                .map_err(|e| MigrationError::connection(e.to_string()))?
        };

        for table_name in table_names {
            if !self.should_include(&table_name) {
                continue;
            }
            let quoted = format!("\"{}\"", table_name.replace('"', "\"\""));
            let mut table = TableDefinition::new(&table_name);

            // (name, declared type, notnull, default, pk ordinal)
            let raw_columns: Vec<(String, String, i64, Option<String>, i64)> = {
                let mut stmt = conn
                    .prepare(&format!("PRAGMA table_info({quoted})"))
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                rows.collect::<Result<_, _>>()
                    .map_err(|e| MigrationError::connection(e.to_string()))?
            };

            // (name, unique, origin)
            let index_list: Vec<(String, i64, String)> = {
                let mut stmt = conn
                    .prepare(&format!("PRAGMA index_list({quoted})"))
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(1)?, row.get(2)?, row.get(3)?)))
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                rows.collect::<Result<_, _>>()
                    .map_err(|e| MigrationError::connection(e.to_string()))?
            };

            let mut unique_columns: HashSet<String> = HashSet::new();
            for (index_name, unique, origin) in &index_list {
                let columns = index_columns(conn, index_name)?;
                if origin == "u" && *unique != 0 && columns.len() == 1 {
                    unique_columns.insert(columns[0].clone());
                } else if origin == "c" {
                    let mut index = IndexDefinition::new(index_name.clone(), columns);
                    if *unique != 0 {
                        index = index.unique();
                    }
                    table.indexes.push(index);
                }
            }

            for (column_name, declared_type, notnull, default, pk) in raw_columns {
                let ty = normalize_type(&table_name, &column_name, &[declared_type.as_str()])?;
                let mut column = ColumnDefinition::new(&column_name, ty);
                column.nullable = notnull == 0 && pk == 0;
                column.default = default;
                column.primary_key = pk > 0;
                column.unique = unique_columns.contains(&column_name);
                table.add_column(column)?;
            }

            // (referenced table, referencing column, referenced column)
            let fks: Vec<(String, String, Option<String>)> = {
                let mut stmt = conn
                    .prepare(&format!("PRAGMA foreign_key_list({quoted})"))
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(2)?, row.get(3)?, row.get(4)?)))
                    .map_err(|e| MigrationError::connection(e.to_string()))?;
                rows.collect::<Result<_, _>>()
                    .map_err(|e| MigrationError::connection(e.to_string()))?
            };
            for (target_table, column, target_column) in fks {
                // An implicit reference points at the target's primary key,
                // which SQLite aliases as "id" in every schema we emit.
                let target_column = target_column.unwrap_or_else(|| "id".to_string());
                table
                    .foreign_keys
                    .push(ForeignKey::new(column, target_table, target_column));
            }

            schema.add_table(table)?;
        }

        Ok(schema)
    }
}

struct ConstraintGroup {
    kind: String,
    columns: Vec<String>,
    referenced_table: Option<String>,
    referenced_column: Option<String>,
}

fn index_columns(conn: &rusqlite::Connection, index_name: &str) -> MigrateResult<Vec<String>> {
    let quoted = format!("\"{}\"", index_name.replace('"', "\"\""));
    let mut stmt = conn
        .prepare(&format!("PRAGMA index_info({quoted})"))
        .map_err(|e| MigrationError::connection(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, Option<String>>(2))
        .map_err(|e| MigrationError::connection(e.to_string()))?;

    let mut columns = Vec::new();
    for row in rows {
        let column = row.map_err(|e| MigrationError::connection(e.to_string()))?;
        // Expression index members have no column name; skip them.
        if let Some(column) = column {
            columns.push(column);
        }
    }
    Ok(columns)
}

fn normalize_type(table: &str, column: &str, candidates: &[&str]) -> MigrateResult<ScalarType> {
    for candidate in candidates {
        if let Some(ty) = ScalarType::from_native(candidate) {
            return Ok(ty);
        }
    }
    Err(MigrationError::discovery(format!(
        "unknown native type '{}' on column '{}.{}'",
        candidates.first().copied().unwrap_or(""),
        table,
        column
    )))
}

/// Catalog queries for PostgreSQL.
pub mod postgres_queries {
    /// Base tables in a schema.
    pub const TABLES: &str = r#"
        SELECT table_name
        FROM information_schema.tables
        WHERE table_schema = $1 AND table_type = 'BASE TABLE'
        ORDER BY table_name
    "#;

    /// Columns of a table, in ordinal order.
    pub const COLUMNS: &str = r#"
        SELECT
            column_name,
            data_type,
            udt_name,
            is_nullable = 'YES' AS is_nullable,
            column_default
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
    "#;

    /// Primary key, unique, and foreign key constraints of a table.
    pub const CONSTRAINTS: &str = r#"
        SELECT
            tc.constraint_name,
            tc.constraint_type,
            kcu.column_name,
            ccu.table_name AS referenced_table,
            ccu.column_name AS referenced_column
        FROM information_schema.table_constraints tc
        LEFT JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        LEFT JOIN information_schema.constraint_column_usage ccu
            ON tc.constraint_name = ccu.constraint_name
            AND tc.table_schema = ccu.table_schema
            AND tc.constraint_type = 'FOREIGN KEY'
        WHERE tc.table_schema = $1 AND tc.table_name = $2
        ORDER BY tc.constraint_name, kcu.ordinal_position
    "#;

    /// Indexes of a table, with their column lists.
    pub const INDEXES: &str = r#"
        SELECT
            i.relname AS index_name,
            array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary
        FROM pg_index ix
        JOIN pg_class i ON ix.indexrelid = i.oid
        JOIN pg_class t ON ix.indrelid = t.oid
        JOIN pg_namespace n ON t.relnamespace = n.oid
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE n.nspname = $1 AND t.relname = $2
        GROUP BY i.relname, ix.indisunique, ix.indisprimary
    "#;
}

/// Catalog queries for MySQL. All are scoped to `DATABASE()`.
pub mod mysql_queries {
    /// Base tables in the current database.
    pub const TABLES: &str = r#"
        SELECT table_name
        FROM information_schema.tables
        WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
        ORDER BY table_name
    "#;

    /// Columns of a table, in ordinal order.
    pub const COLUMNS: &str = r#"
        SELECT column_name, data_type, column_type, is_nullable, column_default, column_key
        FROM information_schema.columns
        WHERE table_schema = DATABASE() AND table_name = ?
        ORDER BY ordinal_position
    "#;

    /// Foreign keys of a table.
    pub const FOREIGN_KEYS: &str = r#"
        SELECT constraint_name, column_name, referenced_table_name, referenced_column_name
        FROM information_schema.key_column_usage
        WHERE table_schema = DATABASE()
          AND table_name = ?
          AND referenced_table_name IS NOT NULL
        ORDER BY constraint_name, ordinal_position
    "#;

    /// Secondary index members of a table.
    pub const INDEXES: &str = r#"
        SELECT index_name, non_unique, column_name
        FROM information_schema.statistics
        WHERE table_schema = DATABASE() AND table_name = ? AND index_name <> 'PRIMARY'
        ORDER BY index_name, seq_in_index
    "#;
}

/// Catalog queries for SQLite. Column-level detail comes from PRAGMAs.
pub mod sqlite_queries {
    /// User tables, excluding SQLite internals.
    pub const TABLES: &str = r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
        ORDER BY name
    "#;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded_db(dir: &TempDir, ddl: &str) -> String {
        let path = dir.path().join("app.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(ddl).unwrap();
        format!("sqlite://{}", path.display())
    }

    #[test]
    fn test_memory_database_rejected() {
        let inspector = SchemaInspector::new(":memory:").unwrap();
        let err = inspector.get_current_schema().unwrap_err();
        assert!(matches!(err, MigrationError::SchemaDiscovery(_)));
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let err = SchemaInspector::new("mongodb://localhost/app").unwrap_err();
        assert!(matches!(err, MigrationError::SchemaDiscovery(_)));
    }

    #[test]
    fn test_sqlite_snapshot_columns_and_keys() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(
            &dir,
            r#"
            CREATE TABLE "users" (
                "id" INTEGER NOT NULL,
                "email" TEXT NOT NULL UNIQUE,
                "bio" TEXT,
                "active" BOOLEAN NOT NULL DEFAULT 1,
                PRIMARY KEY ("id")
            );
            "#,
        );

        let schema = SchemaInspector::new(&url).unwrap().get_current_schema().unwrap();
        let users = schema.table("users").expect("users table");

        let id = users.column("id").unwrap();
        assert_eq!(id.ty, ScalarType::Int);
        assert!(id.primary_key);

        let email = users.column("email").unwrap();
        assert_eq!(email.ty, ScalarType::Str);
        assert!(email.unique);
        assert!(!email.nullable);

        let bio = users.column("bio").unwrap();
        assert!(bio.nullable);

        let active = users.column("active").unwrap();
        assert_eq!(active.ty, ScalarType::Bool);
        assert_eq!(active.default.as_deref(), Some("1"));
    }

    #[test]
    fn test_sqlite_snapshot_foreign_keys_and_indexes() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(
            &dir,
            r#"
            CREATE TABLE "users" ("id" INTEGER NOT NULL, PRIMARY KEY ("id"));
            CREATE TABLE "orders" (
                "id" INTEGER NOT NULL,
                "user_id" INTEGER NOT NULL,
                "placed_at" DATETIME NOT NULL,
                PRIMARY KEY ("id"),
                FOREIGN KEY ("user_id") REFERENCES "users" ("id")
            );
            CREATE INDEX "orders_placed_idx" ON "orders" ("placed_at");
            "#,
        );

        let schema = SchemaInspector::new(&url).unwrap().get_current_schema().unwrap();
        let orders = schema.table("orders").expect("orders table");

        assert_eq!(orders.foreign_keys.len(), 1);
        assert_eq!(orders.foreign_keys[0].column, "user_id");
        assert_eq!(orders.foreign_keys[0].target_table, "users");
        assert_eq!(orders.foreign_keys[0].target_column, "id");

        assert_eq!(orders.indexes.len(), 1);
        assert_eq!(orders.indexes[0].name, "orders_placed_idx");
        assert_eq!(orders.indexes[0].columns, vec!["placed_at".to_string()]);
        assert!(!orders.indexes[0].unique);
    }

    #[test]
    fn test_sqlite_snapshot_excludes_ledger_tables() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(
            &dir,
            r#"
            CREATE TABLE "users" ("id" INTEGER NOT NULL, PRIMARY KEY ("id"));
            CREATE TABLE "dataflow_migrations" (
                "version" TEXT NOT NULL, "checksum" TEXT NOT NULL,
                "applied_at" TEXT NOT NULL, "success" INTEGER NOT NULL
            );
            "#,
        );

        let schema = SchemaInspector::new(&url).unwrap().get_current_schema().unwrap();
        assert!(schema.contains_table("users"));
        assert!(!schema.contains_table("dataflow_migrations"));
    }

    #[test]
    fn test_sqlite_unknown_type_is_discovery_error() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(&dir, r#"CREATE TABLE "t" ("v" GEOMETRY);"#);

        let err = SchemaInspector::new(&url)
            .unwrap()
            .get_current_schema()
            .unwrap_err();
        assert!(matches!(err, MigrationError::SchemaDiscovery(_)));
        assert!(err.to_string().contains("geometry") || err.to_string().contains("GEOMETRY"));
    }

    #[test]
    fn test_postgres_queries_use_catalog() {
        assert!(postgres_queries::TABLES.contains("information_schema.tables"));
        assert!(postgres_queries::COLUMNS.contains("ordinal_position"));
        assert!(postgres_queries::CONSTRAINTS.contains("table_constraints"));
        assert!(postgres_queries::INDEXES.contains("pg_index"));
    }

    #[test]
    fn test_mysql_queries_scope_to_current_database() {
        for query in [
            mysql_queries::TABLES,
            mysql_queries::COLUMNS,
            mysql_queries::FOREIGN_KEYS,
            mysql_queries::INDEXES,
        ] {
            assert!(query.contains("DATABASE()"));
        }
    }
}
