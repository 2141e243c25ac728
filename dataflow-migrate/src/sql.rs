//! Dialect-specific DDL rendering.

use dataflow_schema::{ColumnDefinition, ForeignKey, IndexDefinition, ScalarType, TableDefinition};

use crate::config::{DatabaseKind, DatabaseUrl};
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{Migration, MigrationOperation};

/// A SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL.
    Postgres,
    /// MySQL.
    MySql,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// The dialect for a parsed database URL.
    pub fn for_url(url: &DatabaseUrl) -> Self {
        match url.kind {
            DatabaseKind::Postgres => Self::Postgres,
            DatabaseKind::MySql => Self::MySql,
            DatabaseKind::Sqlite { .. } | DatabaseKind::SqliteMemory => Self::Sqlite,
        }
    }

    /// Quote an identifier.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Self::Postgres | Self::Sqlite => format!("\"{ident}\""),
            Self::MySql => format!("`{ident}`"),
        }
    }

    /// Dialect name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// The SQL type spelling for a column.
    ///
    /// Spellings are chosen so that re-introspecting a freshly created
    /// table normalizes back to the same portable type.
    fn type_sql(&self, column: &ColumnDefinition) -> &'static str {
        match self {
            Self::Postgres => match column.ty {
                ScalarType::Str => "TEXT",
                ScalarType::Int => "INTEGER",
                ScalarType::Float => "DOUBLE PRECISION",
                ScalarType::Bool => "BOOLEAN",
                ScalarType::DateTime => "TIMESTAMP WITH TIME ZONE",
                ScalarType::Date => "DATE",
                ScalarType::Json => "JSONB",
                ScalarType::Bytes => "BYTEA",
                ScalarType::Uuid => "UUID",
            },
            Self::MySql => match column.ty {
                // Key columns need a bounded type; MySQL cannot index a
                // bare TEXT without a prefix length.
                ScalarType::Str if column.primary_key || column.unique => "VARCHAR(255)",
                ScalarType::Str => "TEXT",
                ScalarType::Int => "INT",
                ScalarType::Float => "DOUBLE",
                ScalarType::Bool => "TINYINT(1)",
                ScalarType::DateTime => "DATETIME",
                ScalarType::Date => "DATE",
                ScalarType::Json => "JSON",
                ScalarType::Bytes => "BLOB",
                ScalarType::Uuid => "CHAR(36)",
            },
            Self::Sqlite => match column.ty {
                ScalarType::Str => "TEXT",
                ScalarType::Int => "INTEGER",
                ScalarType::Float => "REAL",
                ScalarType::Bool => "BOOLEAN",
                ScalarType::DateTime => "DATETIME",
                ScalarType::Date => "DATE",
                ScalarType::Json => "JSON",
                ScalarType::Bytes => "BLOB",
                ScalarType::Uuid => "UUID",
            },
        }
    }
}

/// Renders migration operations into dialect DDL statements.
#[derive(Debug, Clone, Copy)]
pub struct SqlGenerator {
    dialect: Dialect,
}

impl SqlGenerator {
    /// Create a generator for a dialect.
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Render every operation of a migration, in order.
    pub fn generate(&self, migration: &Migration) -> MigrateResult<Vec<String>> {
        let mut statements = Vec::new();
        for operation in &migration.operations {
            statements.extend(self.render(operation)?);
        }
        Ok(statements)
    }

    /// Render a single operation. Some operations expand to more than one
    /// statement (a table with indexes, for example).
    pub fn render(&self, operation: &MigrationOperation) -> MigrateResult<Vec<String>> {
        match operation {
            MigrationOperation::CreateTable { table } => Ok(self.create_table(table)),
            MigrationOperation::DropTable { table } => Ok(vec![self.drop_table(table)]),
            MigrationOperation::AddColumn { table, column } => {
                Ok(vec![self.add_column(table, column)])
            }
            MigrationOperation::AlterColumn { table, column, .. } => {
                self.alter_column(table, column).map(|s| vec![s])
            }
            MigrationOperation::DropColumn { table, column } => {
                Ok(vec![self.drop_column(table, column)])
            }
            MigrationOperation::AddConstraint { table, foreign_key } => {
                self.add_constraint(table, foreign_key).map(|s| vec![s])
            }
            MigrationOperation::DropConstraint { table, foreign_key } => {
                self.drop_constraint(table, foreign_key).map(|s| vec![s])
            }
            MigrationOperation::CreateIndex { table, index } => {
                Ok(vec![self.create_index(table, index)])
            }
            MigrationOperation::DropIndex { table, index } => {
                Ok(vec![self.drop_index(table, index)])
            }
        }
    }

    /// Generate CREATE TABLE plus one CREATE INDEX per secondary index.
    fn create_table(&self, table: &TableDefinition) -> Vec<String> {
        let q = |ident: &str| self.dialect.quote(ident);
        let mut parts: Vec<String> = Vec::new();

        for column in table.columns() {
            parts.push(self.column_definition(column));
        }

        let pk_columns = table.primary_key_columns();
        if !pk_columns.is_empty() {
            let cols: Vec<String> = pk_columns.iter().map(|c| q(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        // Foreign keys go inline; the generator orders referenced tables
        // first, so the targets always exist by the time this runs.
        for fk in &table.foreign_keys {
            let clause = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                q(&fk.column),
                q(&fk.target_table),
                q(&fk.target_column)
            );
            match &fk.name {
                Some(name) => parts.push(format!("CONSTRAINT {} {}", q(name), clause)),
                None => parts.push(clause),
            }
        }

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n    {}\n);",
            q(&table.name),
            parts.join(",\n    ")
        )];

        for index in &table.indexes {
            statements.push(self.create_index(&table.name, index));
        }

        statements
    }

    /// Generate a column definition fragment.
    fn column_definition(&self, column: &ColumnDefinition) -> String {
        let mut parts = vec![
            self.dialect.quote(&column.name),
            self.dialect.type_sql(column).to_string(),
        ];

        if !column.nullable && !column.primary_key {
            parts.push("NOT NULL".to_string());
        }

        if column.unique && !column.primary_key {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {default}"));
        }

        parts.join(" ")
    }

    fn drop_table(&self, table: &str) -> String {
        match self.dialect {
            Dialect::Postgres => {
                format!("DROP TABLE IF EXISTS {} CASCADE;", self.dialect.quote(table))
            }
            Dialect::MySql | Dialect::Sqlite => {
                format!("DROP TABLE IF EXISTS {};", self.dialect.quote(table))
            }
        }
    }

    fn add_column(&self, table: &str, column: &ColumnDefinition) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.dialect.quote(table),
            self.column_definition(column)
        )
    }

    fn alter_column(&self, table: &str, column: &ColumnDefinition) -> MigrateResult<String> {
        let q = |ident: &str| self.dialect.quote(ident);
        match self.dialect {
            Dialect::Postgres => Ok(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                q(table),
                q(&column.name),
                self.dialect.type_sql(column),
                q(&column.name),
                self.dialect.type_sql(column)
            )),
            Dialect::MySql => {
                let mut definition = format!(
                    "{} {}",
                    q(&column.name),
                    self.dialect.type_sql(column)
                );
                if !column.nullable {
                    definition.push_str(" NOT NULL");
                }
                Ok(format!("ALTER TABLE {} MODIFY COLUMN {};", q(table), definition))
            }
            Dialect::Sqlite => Err(MigrationError::UnsupportedOperation {
                dialect: self.dialect.name().to_string(),
                operation: format!("alter column type of '{}.{}'", table, column.name),
            }),
        }
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.dialect.quote(table),
            self.dialect.quote(column)
        )
    }

    fn add_constraint(&self, table: &str, fk: &ForeignKey) -> MigrateResult<String> {
        let q = |ident: &str| self.dialect.quote(ident);
        match self.dialect {
            Dialect::Postgres | Dialect::MySql => {
                let name = match &fk.name {
                    Some(name) => name.clone(),
                    None => format!("{}_{}_fkey", table, fk.column),
                };
                Ok(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({});",
                    q(table),
                    q(&name),
                    q(&fk.column),
                    q(&fk.target_table),
                    q(&fk.target_column)
                ))
            }
            Dialect::Sqlite => Err(MigrationError::UnsupportedOperation {
                dialect: self.dialect.name().to_string(),
                operation: format!("add foreign key on existing table '{table}'"),
            }),
        }
    }

    fn drop_constraint(&self, table: &str, fk: &ForeignKey) -> MigrateResult<String> {
        let q = |ident: &str| self.dialect.quote(ident);
        let name = fk.name.as_ref().ok_or_else(|| {
            MigrationError::UnsupportedOperation {
                dialect: self.dialect.name().to_string(),
                operation: format!("drop unnamed foreign key on '{table}'"),
            }
        })?;

        match self.dialect {
            Dialect::Postgres => Ok(format!(
                "ALTER TABLE {} DROP CONSTRAINT {};",
                q(table),
                q(name)
            )),
            Dialect::MySql => Ok(format!(
                "ALTER TABLE {} DROP FOREIGN KEY {};",
                q(table),
                q(name)
            )),
            Dialect::Sqlite => Err(MigrationError::UnsupportedOperation {
                dialect: self.dialect.name().to_string(),
                operation: format!("drop foreign key on '{table}'"),
            }),
        }
    }

    fn create_index(&self, table: &str, index: &IndexDefinition) -> String {
        let q = |ident: &str| self.dialect.quote(ident);
        let unique = if index.unique { "UNIQUE " } else { "" };
        let columns: Vec<String> = index.columns.iter().map(|c| q(c)).collect();

        match self.dialect {
            // MySQL has no IF NOT EXISTS for indexes.
            Dialect::MySql => format!(
                "CREATE {}INDEX {} ON {} ({});",
                unique,
                q(&index.name),
                q(table),
                columns.join(", ")
            ),
            Dialect::Postgres | Dialect::Sqlite => format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
                unique,
                q(&index.name),
                q(table),
                columns.join(", ")
            ),
        }
    }

    fn drop_index(&self, table: &str, index: &str) -> String {
        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => {
                format!("DROP INDEX IF EXISTS {};", self.dialect.quote(index))
            }
            Dialect::MySql => format!(
                "DROP INDEX {} ON {};",
                self.dialect.quote(index),
                self.dialect.quote(table)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_schema::ColumnDefinition as Col;

    fn users() -> TableDefinition {
        TableDefinition::new("users")
            .with_column(Col::new("id", ScalarType::Int).primary_key())
            .with_column(Col::new("email", ScalarType::Str).unique())
            .with_column(Col::new("bio", ScalarType::Str).nullable())
            .with_index(IndexDefinition::new("users_email_idx", vec!["email".into()]).unique())
    }

    #[test]
    fn test_postgres_create_table() {
        let statements = SqlGenerator::new(Dialect::Postgres).create_table(&users());
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE \"users\""));
        assert!(statements[0].contains("\"email\" TEXT NOT NULL UNIQUE"));
        assert!(statements[0].contains("PRIMARY KEY (\"id\")"));
        // Nullable column gets no NOT NULL.
        assert!(statements[0].contains("\"bio\" TEXT,"));
        assert!(statements[1].contains("CREATE UNIQUE INDEX IF NOT EXISTS \"users_email_idx\""));
    }

    #[test]
    fn test_mysql_create_table_quoting_and_key_types() {
        let statements = SqlGenerator::new(Dialect::MySql).create_table(&users());
        assert!(statements[0].contains("CREATE TABLE `users`"));
        // Unique string column becomes VARCHAR so MySQL can index it.
        assert!(statements[0].contains("`email` VARCHAR(255) NOT NULL UNIQUE"));
    }

    #[test]
    fn test_sqlite_inlines_foreign_keys() {
        let orders = TableDefinition::new("orders")
            .with_column(Col::new("id", ScalarType::Int).primary_key())
            .with_column(Col::new("user_id", ScalarType::Int))
            .with_foreign_key(ForeignKey::new("user_id", "users", "id"));

        let statements = SqlGenerator::new(Dialect::Sqlite).create_table(&orders);
        assert!(statements[0].contains("FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\")"));
    }

    #[test]
    fn test_add_column() {
        let sql = SqlGenerator::new(Dialect::Postgres)
            .add_column("users", &Col::new("age", ScalarType::Int).nullable());
        assert_eq!(sql, "ALTER TABLE \"users\" ADD COLUMN \"age\" INTEGER;");
    }

    #[test]
    fn test_add_column_with_default() {
        let sql = SqlGenerator::new(Dialect::Sqlite).add_column(
            "users",
            &Col::new("active", ScalarType::Bool).with_default("TRUE"),
        );
        assert!(sql.contains("DEFAULT TRUE"));
    }

    #[test]
    fn test_alter_column_postgres_uses_cast() {
        let sql = SqlGenerator::new(Dialect::Postgres)
            .alter_column("users", &Col::new("age", ScalarType::Int))
            .unwrap();
        assert!(sql.contains("ALTER COLUMN \"age\" TYPE INTEGER USING \"age\"::INTEGER"));
    }

    #[test]
    fn test_alter_column_mysql_modifies() {
        let sql = SqlGenerator::new(Dialect::MySql)
            .alter_column("users", &Col::new("age", ScalarType::Int))
            .unwrap();
        assert!(sql.contains("MODIFY COLUMN `age` INT NOT NULL"));
    }

    #[test]
    fn test_alter_column_sqlite_rejected() {
        let err = SqlGenerator::new(Dialect::Sqlite)
            .alter_column("users", &Col::new("age", ScalarType::Int))
            .unwrap_err();
        assert!(matches!(err, MigrationError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_add_constraint_generates_name_when_missing() {
        let sql = SqlGenerator::new(Dialect::Postgres)
            .add_constraint("orders", &ForeignKey::new("user_id", "users", "id"))
            .unwrap();
        assert!(sql.contains("ADD CONSTRAINT \"orders_user_id_fkey\""));
    }

    #[test]
    fn test_drop_constraint_mysql_spelling() {
        let sql = SqlGenerator::new(Dialect::MySql)
            .drop_constraint(
                "orders",
                &ForeignKey::new("user_id", "users", "id").named("orders_user_fk"),
            )
            .unwrap();
        assert!(sql.contains("DROP FOREIGN KEY `orders_user_fk`"));
    }

    #[test]
    fn test_drop_table_postgres_cascades() {
        let sql = SqlGenerator::new(Dialect::Postgres).drop_table("users");
        assert!(sql.contains("CASCADE"));
        let sql = SqlGenerator::new(Dialect::Sqlite).drop_table("users");
        assert!(!sql.contains("CASCADE"));
    }

    #[test]
    fn test_generate_flattens_migration() {
        let migration = Migration::new(
            "v1",
            vec![
                MigrationOperation::CreateTable { table: users() },
                MigrationOperation::AddColumn {
                    table: "users".into(),
                    column: Col::new("age", ScalarType::Int).nullable(),
                },
            ],
        )
        .unwrap();

        let statements = SqlGenerator::new(Dialect::Sqlite).generate(&migration).unwrap();
        // CREATE TABLE + CREATE INDEX + ADD COLUMN.
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[2].starts_with("ALTER TABLE"));
    }

    #[test]
    fn test_mysql_drop_index_names_table() {
        let sql = SqlGenerator::new(Dialect::MySql).drop_index("users", "users_email_idx");
        assert_eq!(sql, "DROP INDEX `users_email_idx` ON `users`;");
    }
}
