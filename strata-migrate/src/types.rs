//! Canonical column types and normalization of database-reported types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of column types a descriptor may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    /// Bounded variable-length string.
    String,
    /// Unbounded text.
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// 16-bit integer.
    SmallInt,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// Arbitrary precision decimal.
    Decimal,
    /// Boolean.
    Boolean,
    /// Date or timestamp.
    Date,
    /// JSON document.
    Json,
    /// UUID.
    Uuid,
}

impl ColumnType {
    /// The canonical tag used in comparisons and diff messages.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::SmallInt => "SMALLINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Json => "JSON",
            Self::Uuid => "UUID",
        }
    }

    /// Whether values of this type are integers (usable as auto-increment keys).
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::SmallInt)
    }

    /// PostgreSQL column type for this canonical type.
    pub fn postgres_type(&self, auto_increment: bool) -> &'static str {
        match (self, auto_increment) {
            (Self::Integer, true) => "SERIAL",
            (Self::BigInt, true) => "BIGSERIAL",
            (Self::SmallInt, true) => "SMALLSERIAL",
            (Self::String, _) => "VARCHAR(255)",
            (Self::Text, _) => "TEXT",
            (Self::Integer, false) => "INTEGER",
            (Self::BigInt, false) => "BIGINT",
            (Self::SmallInt, false) => "SMALLINT",
            (Self::Float, _) => "REAL",
            (Self::Double, _) => "DOUBLE PRECISION",
            (Self::Decimal, _) => "DECIMAL",
            (Self::Boolean, _) => "BOOLEAN",
            (Self::Date, _) => "TIMESTAMP WITH TIME ZONE",
            (Self::Json, _) => "JSON",
            (Self::Uuid, _) => "UUID",
        }
    }

    /// The type string PostgreSQL reports back through `information_schema`
    /// for a column created with [`ColumnType::postgres_type`].
    pub fn postgres_reported(&self) -> &'static str {
        match self {
            Self::String => "CHARACTER VARYING(255)",
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::SmallInt => "SMALLINT",
            Self::Float => "REAL",
            Self::Double => "DOUBLE PRECISION",
            Self::Decimal => "NUMERIC",
            Self::Boolean => "BOOLEAN",
            Self::Date => "TIMESTAMP WITH TIME ZONE",
            Self::Json => "JSON",
            Self::Uuid => "UUID",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A database-reported type after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedType {
    /// The reported type maps to a canonical type.
    Canonical(ColumnType),
    /// No mapping exists; the uppercased spelling is kept as-is.
    Unmapped(String),
}

impl NormalizedType {
    /// The tag compared against a descriptor's [`ColumnType::tag`].
    pub fn tag(&self) -> &str {
        match self {
            Self::Canonical(ty) => ty.tag(),
            Self::Unmapped(raw) => raw,
        }
    }

    /// Whether this normalized type matches a declared type.
    pub fn matches(&self, desired: ColumnType) -> bool {
        self.tag() == desired.tag()
    }
}

impl fmt::Display for NormalizedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Normalize a type string reported by the database.
///
/// Dialect spellings collapse onto canonical tags: `CHARACTER VARYING(255)`
/// and `VARCHAR` become `STRING`, `INT4` becomes `INTEGER`, any timestamp
/// spelling becomes `DATE`, and so on. Unknown spellings pass through
/// uppercased, so they compare strictly.
pub fn normalize_type(reported: &str) -> NormalizedType {
    let s = reported.trim().to_uppercase();
    let base = s.split('(').next().unwrap_or_default().trim();

    let canonical = if s.contains("CHARACTER VARYING") || s.contains("VARCHAR") {
        Some(ColumnType::String)
    } else if base == "TEXT" {
        Some(ColumnType::Text)
    } else {
        match base {
            "INTEGER" | "INT" | "INT4" | "SERIAL" | "SERIAL4" => Some(ColumnType::Integer),
            "BIGINT" | "INT8" | "BIGSERIAL" | "SERIAL8" => Some(ColumnType::BigInt),
            "SMALLINT" | "INT2" | "SMALLSERIAL" | "SERIAL2" => Some(ColumnType::SmallInt),
            "BOOLEAN" | "BOOL" => Some(ColumnType::Boolean),
            "REAL" | "FLOAT4" => Some(ColumnType::Float),
            "DOUBLE PRECISION" | "FLOAT8" | "DOUBLE" => Some(ColumnType::Double),
            "NUMERIC" | "DECIMAL" => Some(ColumnType::Decimal),
            "UUID" => Some(ColumnType::Uuid),
            _ if s.contains("DATE") || s.contains("TIMESTAMP") => Some(ColumnType::Date),
            _ if s.contains("JSON") => Some(ColumnType::Json),
            _ => None,
        }
    };

    match canonical {
        Some(ty) => NormalizedType::Canonical(ty),
        None => NormalizedType::Unmapped(s),
    }
}
