//! Schema comparison between a live table and its descriptor.

use std::fmt;

use indexmap::IndexMap;

use crate::descriptor::{FieldSpec, MANAGED_TIMESTAMPS};
use crate::types::{ColumnType, normalize_type};

/// The database's own description of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    /// Column name.
    pub name: String,
    /// Type string as reported (e.g. `CHARACTER VARYING(255)`).
    pub reported_type: String,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

impl LiveColumn {
    /// Create a live column description.
    pub fn new(
        name: impl Into<String>,
        reported_type: impl Into<String>,
        allow_null: bool,
        primary_key: bool,
    ) -> Self {
        Self {
            name: name.into(),
            reported_type: reported_type.into(),
            allow_null,
            primary_key,
        }
    }
}

/// One detected difference between live and desired shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Difference {
    /// Desired field has no live column.
    FieldAdded(String),
    /// Live column has no desired field.
    FieldRemoved(String),
    /// Normalized types differ.
    TypeChanged {
        /// Field name.
        field: String,
        /// Type as reported by the database.
        reported: String,
        /// Normalized live tag.
        live: String,
        /// Desired type.
        desired: ColumnType,
    },
    /// Nullability differs.
    NullabilityChanged {
        /// Field name.
        field: String,
        /// Live nullability.
        live: bool,
        /// Desired nullability.
        desired: bool,
    },
    /// Primary key membership differs.
    PrimaryKeyChanged {
        /// Field name.
        field: String,
        /// Live membership.
        live: bool,
        /// Desired membership.
        desired: bool,
    },
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldAdded(name) => write!(f, "+ field added: {}", name),
            Self::FieldRemoved(name) => write!(f, "- field removed: {}", name),
            Self::TypeChanged {
                field,
                reported,
                live,
                desired,
            } => write!(
                f,
                "~ type changed for {}: {} (normalized: {}) -> {}",
                field, reported, live, desired
            ),
            Self::NullabilityChanged {
                field,
                live,
                desired,
            } => write!(f, "~ nullability changed for {}: {} -> {}", field, live, desired),
            Self::PrimaryKeyChanged {
                field,
                live,
                desired,
            } => write!(
                f,
                "~ primary-key status changed for {}: {} -> {}",
                field, live, desired
            ),
        }
    }
}

/// Result of comparing a live table with its desired fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comparison {
    /// Whether the table must be rebuilt.
    pub needs_migration: bool,
    /// Detected differences in detection order.
    pub differences: Vec<Difference>,
    /// Fields present on both sides with no difference.
    pub common_fields: Vec<String>,
    /// Fields present on both sides, changed or not.
    pub shared_fields: Vec<String>,
}

impl Comparison {
    /// Human-readable difference lines.
    pub fn describe(&self) -> Vec<String> {
        self.differences.iter().map(ToString::to_string).collect()
    }
}

/// Compare a live table with the desired fields.
pub fn compare(live: &[LiveColumn], desired: &IndexMap<String, FieldSpec>) -> Comparison {
    let mut result = Comparison::default();

    for (name, spec) in desired {
        let Some(column) = live.iter().find(|c| &c.name == name) else {
            result.differences.push(Difference::FieldAdded(name.clone()));
            continue;
        };

        result.shared_fields.push(name.clone());
        let before = result.differences.len();

        let normalized = normalize_type(&column.reported_type);
        if !normalized.matches(spec.ty) {
            result.differences.push(Difference::TypeChanged {
                field: name.clone(),
                reported: column.reported_type.clone(),
                live: normalized.tag().to_string(),
                desired: spec.ty,
            });
        }

        let desired_null = spec.allows_null();
        if column.allow_null != desired_null {
            result.differences.push(Difference::NullabilityChanged {
                field: name.clone(),
                live: column.allow_null,
                desired: desired_null,
            });
        }

        if column.primary_key != spec.primary_key {
            result.differences.push(Difference::PrimaryKeyChanged {
                field: name.clone(),
                live: column.primary_key,
                desired: spec.primary_key,
            });
        }

        if result.differences.len() == before {
            result.common_fields.push(name.clone());
        }
    }

    for column in live {
        if !desired.contains_key(&column.name)
            && !MANAGED_TIMESTAMPS.contains(&column.name.as_str())
        {
            result
                .differences
                .push(Difference::FieldRemoved(column.name.clone()));
        }
    }

    result.needs_migration = !result.differences.is_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TableDescriptor;
    use pretty_assertions::assert_eq;

    fn roles() -> TableDescriptor {
        TableDescriptor::new("Roles", "roles")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
            .field("name", FieldSpec::new(ColumnType::String).not_null().unique())
            .timestamps(false)
    }

    fn live_roles() -> Vec<LiveColumn> {
        vec![
            LiveColumn::new("id", "INTEGER", false, true),
            LiveColumn::new("name", "CHARACTER VARYING(255)", false, false),
        ]
    }

    #[test]
    fn test_matching_table() {
        let cmp = compare(&live_roles(), &roles().desired_fields());
        assert!(!cmp.needs_migration);
        assert!(cmp.differences.is_empty());
        assert_eq!(cmp.common_fields, vec!["id", "name"]);
    }

    #[test]
    fn test_field_added_and_removed() {
        let desired = roles()
            .field("description", FieldSpec::new(ColumnType::Text))
            .desired_fields();
        let mut live = live_roles();
        live.push(LiveColumn::new("legacy", "TEXT", true, false));

        let cmp = compare(&live, &desired);
        assert!(cmp.needs_migration);
        assert_eq!(
            cmp.differences,
            vec![
                Difference::FieldAdded("description".into()),
                Difference::FieldRemoved("legacy".into()),
            ]
        );
        assert_eq!(cmp.common_fields, vec!["id", "name"]);
    }

    #[test]
    fn test_type_nullability_and_key_changes() {
        let live = vec![
            LiveColumn::new("id", "BIGINT", false, true),
            LiveColumn::new("name", "CHARACTER VARYING(255)", true, true),
        ];
        let cmp = compare(&live, &roles().desired_fields());

        assert!(cmp.needs_migration);
        assert_eq!(cmp.differences.len(), 3);
        assert!(cmp.common_fields.is_empty());
        assert_eq!(cmp.shared_fields, vec!["id", "name"]);

        let lines = cmp.describe();
        assert!(lines[0].contains("BIGINT"));
        assert!(lines[1].contains("nullability"));
        assert!(lines[2].contains("primary-key"));
    }

    #[test]
    fn test_managed_timestamps_never_reported_removed() {
        let mut live = live_roles();
        live.push(LiveColumn::new("createdAt", "TIMESTAMP WITH TIME ZONE", false, false));
        live.push(LiveColumn::new("updatedAt", "TIMESTAMP WITH TIME ZONE", false, false));

        let cmp = compare(&live, &roles().desired_fields());
        assert!(!cmp.needs_migration);
    }

    #[test]
    fn test_enabling_timestamps_is_detected() {
        let cmp = compare(&live_roles(), &roles().timestamps(true).desired_fields());
        assert!(cmp.needs_migration);
        assert_eq!(
            cmp.differences,
            vec![
                Difference::FieldAdded("createdAt".into()),
                Difference::FieldAdded("updatedAt".into()),
            ]
        );
    }

    #[test]
    fn test_unmapped_type_compares_strictly() {
        let desired = TableDescriptor::new("T", "t")
            .field("addr", FieldSpec::new(ColumnType::String))
            .timestamps(false)
            .desired_fields();
        let live = vec![LiveColumn::new("addr", "inet", true, false)];
        let cmp = compare(&live, &desired);
        assert!(cmp.needs_migration);
        assert!(cmp.describe()[0].contains("INET"));
    }
}
