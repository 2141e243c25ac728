//! Portable scalar-type vocabulary and the type-compatibility table.
//!
//! Native catalog types from PostgreSQL, MySQL, and SQLite are normalized
//! into a small portable vocabulary so that a model declared once can be
//! compared against any supported backend. Two native spellings are
//! compatible exactly when they normalize to the same [`ScalarType`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A normalized column type.
///
/// This is the vocabulary models declare in and the target every native
/// catalog type is mapped onto during introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Character data (`varchar`, `text`, `character varying`, ...).
    Str,
    /// Integer data (`integer`, `bigint`, `serial`, ...).
    Int,
    /// Floating point and fixed-precision numeric data.
    Float,
    /// Boolean data.
    Bool,
    /// Timestamps, with or without time zone.
    DateTime,
    /// Calendar dates.
    Date,
    /// JSON documents (`json`, `jsonb`).
    Json,
    /// Raw binary data (`bytea`, `blob`).
    Bytes,
    /// UUID values.
    Uuid,
}

impl ScalarType {
    /// Normalize a native database type name.
    ///
    /// Length and precision arguments are ignored (`varchar(255)` and
    /// `varchar` normalize identically), with the exception of MySQL's
    /// `tinyint(1)` which is its conventional boolean spelling. Returns
    /// `None` for types outside the portable vocabulary.
    pub fn from_native(name: &str) -> Option<Self> {
        let lowered = name.trim().to_lowercase();

        // MySQL spells booleans as a one-digit tinyint and stores UUIDs in
        // their canonical 36-character form.
        if lowered == "tinyint(1)" {
            return Some(Self::Bool);
        }
        if lowered == "char(36)" {
            return Some(Self::Uuid);
        }

        let base = match lowered.find('(') {
            Some(pos) => lowered[..pos].trim_end(),
            None => lowered.as_str(),
        };

        let scalar = match base {
            "str" | "varchar" | "character varying" | "character" | "char" | "bpchar" | "text"
            | "nvarchar" | "nchar" | "clob" | "string" | "tinytext" | "mediumtext"
            | "longtext" => Self::Str,
            "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "mediumint" | "bigint"
            | "serial" | "smallserial" | "bigserial" | "tinyint" => Self::Int,
            "float" | "float4" | "float8" | "real" | "double" | "double precision" | "numeric"
            | "decimal" | "money" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            "datetime" | "timestamp" | "timestamptz" | "timestamp with time zone"
            | "timestamp without time zone" => Self::DateTime,
            "date" => Self::Date,
            "json" | "jsonb" => Self::Json,
            "bytes" | "bytea" | "blob" | "binary" | "varbinary" | "tinyblob" | "mediumblob"
            | "longblob" => Self::Bytes,
            "uuid" => Self::Uuid,
            _ => return None,
        };

        Some(scalar)
    }

    /// The portable tag for this type (`"str"`, `"int"`, ...).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::DateTime => "datetime",
            Self::Date => "date",
            Self::Json => "json",
            Self::Bytes => "bytes",
            Self::Uuid => "uuid",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Check whether two type names are compatible.
///
/// Both sides may be a portable tag or a native spelling; the relation is
/// symmetric. `types_are_compatible("str", "varchar")` holds,
/// `types_are_compatible("str", "integer")` does not. Unknown spellings are
/// compatible with nothing, themselves included.
pub fn types_are_compatible(a: &str, b: &str) -> bool {
    match (ScalarType::from_native(a), ScalarType::from_native(b)) {
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_native_strings() {
        assert_eq!(ScalarType::from_native("varchar"), Some(ScalarType::Str));
        assert_eq!(
            ScalarType::from_native("character varying"),
            Some(ScalarType::Str)
        );
        assert_eq!(ScalarType::from_native("varchar(255)"), Some(ScalarType::Str));
        assert_eq!(ScalarType::from_native("TEXT"), Some(ScalarType::Str));
    }

    #[test]
    fn test_from_native_integers() {
        assert_eq!(ScalarType::from_native("integer"), Some(ScalarType::Int));
        assert_eq!(ScalarType::from_native("serial"), Some(ScalarType::Int));
        assert_eq!(ScalarType::from_native("bigint"), Some(ScalarType::Int));
        assert_eq!(ScalarType::from_native("int8"), Some(ScalarType::Int));
    }

    #[test]
    fn test_from_native_timestamps() {
        assert_eq!(
            ScalarType::from_native("timestamp with time zone"),
            Some(ScalarType::DateTime)
        );
        assert_eq!(
            ScalarType::from_native("timestamptz"),
            Some(ScalarType::DateTime)
        );
        assert_eq!(ScalarType::from_native("datetime"), Some(ScalarType::DateTime));
    }

    #[test]
    fn test_from_native_mysql_boolean() {
        assert_eq!(ScalarType::from_native("tinyint(1)"), Some(ScalarType::Bool));
        assert_eq!(ScalarType::from_native("tinyint(4)"), Some(ScalarType::Int));
        assert_eq!(ScalarType::from_native("tinyint"), Some(ScalarType::Int));
    }

    #[test]
    fn test_from_native_mysql_uuid_convention() {
        assert_eq!(ScalarType::from_native("char(36)"), Some(ScalarType::Uuid));
        assert_eq!(ScalarType::from_native("char(35)"), Some(ScalarType::Str));
        assert_eq!(ScalarType::from_native("uuid"), Some(ScalarType::Uuid));
    }

    #[test]
    fn test_from_native_unknown() {
        assert_eq!(ScalarType::from_native("hyperloglog"), None);
        assert_eq!(ScalarType::from_native(""), None);
    }

    #[test]
    fn test_compatibility_aliases() {
        for native in ["varchar", "text", "character varying", "varchar(100)"] {
            assert!(types_are_compatible("str", native), "str vs {native}");
            assert!(types_are_compatible(native, "str"), "{native} vs str");
        }
        for native in ["integer", "bigint", "serial", "int4"] {
            assert!(types_are_compatible("int", native), "int vs {native}");
        }
        for native in ["decimal", "numeric", "real", "double precision"] {
            assert!(types_are_compatible("float", native), "float vs {native}");
        }
        for native in ["timestamp", "timestamp with time zone", "datetime"] {
            assert!(types_are_compatible("datetime", native), "datetime vs {native}");
        }
    }

    #[test]
    fn test_compatibility_rejects_mismatches() {
        assert!(!types_are_compatible("str", "integer"));
        assert!(!types_are_compatible("bool", "text"));
        assert!(!types_are_compatible("uuid", "int"));
        assert!(!types_are_compatible("widget", "widget"));
    }

    #[test]
    fn test_tag_round_trip() {
        for scalar in [
            ScalarType::Str,
            ScalarType::Int,
            ScalarType::Float,
            ScalarType::Bool,
            ScalarType::DateTime,
            ScalarType::Date,
            ScalarType::Json,
            ScalarType::Bytes,
            ScalarType::Uuid,
        ] {
            assert_eq!(ScalarType::from_native(scalar.tag()), Some(scalar));
        }
    }
}
