//! Error types for the schema model.

use thiserror::Error;

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while building or validating schema definitions.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A table already contains a column with this name.
    #[error("duplicate column '{column}' in table '{table}'")]
    DuplicateColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A schema already contains a table with this name.
    #[error("duplicate table '{0}'")]
    DuplicateTable(String),

    /// A native database type could not be normalized.
    #[error("unknown native type '{0}'")]
    UnknownType(String),
}

impl SchemaError {
    /// Create a duplicate column error.
    pub fn duplicate_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::DuplicateColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType(name.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_column_display() {
        let err = SchemaError::duplicate_column("users", "email");
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("email"));
    }

    #[test]
    fn test_unknown_type_display() {
        let err = SchemaError::unknown_type("hyperloglog");
        assert!(err.to_string().contains("hyperloglog"));
    }
}
