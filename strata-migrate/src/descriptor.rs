//! Declarative table descriptors.
//!
//! A descriptor is the shape a table should have: its fields in declaration
//! order, their canonical types and flags, and table-level options. Packages
//! and their modules ship descriptors as JSON arrays:
//!
//! ```json
//! [
//!   {
//!     "name": "Roles",
//!     "tableName": "roles",
//!     "fields": {
//!       "id":   { "type": "INTEGER", "primaryKey": true, "autoIncrement": true },
//!       "name": { "type": "STRING", "allowNull": false, "unique": true }
//!     },
//!     "options": { "timestamps": false }
//!   }
//! ]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MigrateResult, MigrationError};
use crate::types::ColumnType;

/// Name of the managed creation timestamp column.
pub const CREATED_AT: &str = "createdAt";

/// Name of the managed update timestamp column.
pub const UPDATED_AT: &str = "updatedAt";

/// Columns managed by the engine rather than declared by descriptors.
pub const MANAGED_TIMESTAMPS: [&str; 2] = [CREATED_AT, UPDATED_AT];

/// Declarative shape of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    /// Logical model name.
    pub name: String,
    /// Physical table name.
    pub table_name: String,
    /// Fields in declaration order.
    pub fields: IndexMap<String, FieldSpec>,
    /// Table-level options.
    #[serde(default)]
    pub options: TableOptions,
}

/// Declared shape of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Canonical column type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Whether NULL is allowed; absent means allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_null: Option<bool>,
    /// Part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Backed by a sequence.
    #[serde(default)]
    pub auto_increment: bool,
    /// Single-column uniqueness.
    #[serde(default)]
    pub unique: bool,
    /// Value used when a new row omits this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Foreign key reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
}

/// A foreign key reference to another table's column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Referenced table name.
    pub model: String,
    /// Referenced column.
    #[serde(default = "default_reference_key")]
    pub key: String,
    /// Referential action on delete (e.g. `CASCADE`, `SET NULL`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
}

fn default_reference_key() -> String {
    "id".to_string()
}

/// Table-level options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOptions {
    /// Whether `createdAt`/`updatedAt` are managed on this table.
    #[serde(default = "default_timestamps")]
    pub timestamps: bool,
    /// Additional (possibly multi-column) indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
}

fn default_timestamps() -> bool {
    true
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            timestamps: true,
            indexes: Vec::new(),
        }
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Explicit index name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Indexed columns.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// The index name, derived from the table and columns when not given.
    pub fn name_for(&self, table: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", table, self.fields.join("_")))
    }
}

impl FieldSpec {
    /// Create a nullable field of the given type.
    pub fn new(ty: ColumnType) -> Self {
        Self {
            ty,
            allow_null: None,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default_value: None,
            references: None,
        }
    }

    /// Mark as an auto-increment primary key.
    pub fn auto_key(mut self) -> Self {
        self.primary_key = true;
        self.auto_increment = true;
        self
    }

    /// Mark as part of the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Disallow NULL.
    pub fn not_null(mut self) -> Self {
        self.allow_null = Some(false);
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Reference another table's column.
    pub fn references(mut self, table: impl Into<String>, key: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            model: table.into(),
            key: key.into(),
            on_delete: None,
        });
        self
    }

    /// Effective nullability. Primary key columns are never nullable.
    pub fn allows_null(&self) -> bool {
        !self.primary_key && self.allow_null.unwrap_or(true)
    }
}

impl TableDescriptor {
    /// Create an empty descriptor.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            fields: IndexMap::new(),
            options: TableOptions::default(),
        }
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Enable or disable managed timestamps.
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.options.timestamps = enabled;
        self
    }

    /// Add an index.
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.options.indexes.push(index);
        self
    }

    /// The full desired column set: declared fields followed by the managed
    /// timestamp columns when enabled.
    pub fn desired_fields(&self) -> IndexMap<String, FieldSpec> {
        let mut fields = self.fields.clone();
        if self.options.timestamps {
            for name in MANAGED_TIMESTAMPS {
                fields
                    .entry(name.to_string())
                    .or_insert_with(|| FieldSpec::new(ColumnType::Date).not_null());
            }
        }
        fields
    }

    /// Names of the primary key fields.
    pub fn primary_key_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.primary_key)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The single primary key column, if the key is not composite.
    pub fn single_primary_key(&self) -> Option<&str> {
        match self.primary_key_fields().as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// The auto-increment primary key column, if any.
    pub fn auto_increment_key(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, spec)| spec.primary_key && spec.auto_increment)
            .map(|(name, _)| name.as_str())
    }

    /// Whether a column name belongs to this table's desired shape.
    pub fn has_column(&self, name: &str) -> bool {
        self.fields.contains_key(name)
            || (self.options.timestamps && MANAGED_TIMESTAMPS.contains(&name))
    }

    /// Tables this descriptor references, excluding itself.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .fields
            .values()
            .filter_map(|spec| spec.references.as_ref())
            .map(|fk| fk.model.as_str())
            .filter(|model| *model != self.table_name)
            .collect();
        deps.dedup();
        deps
    }

    /// Check structural rules a descriptor must satisfy.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.name.trim().is_empty() || self.table_name.trim().is_empty() {
            return Err(MigrationError::descriptor(
                "descriptor name and tableName must not be empty",
            ));
        }
        if self.fields.is_empty() {
            return Err(MigrationError::descriptor(format!(
                "table '{}' declares no fields",
                self.table_name
            )));
        }

        let auto: Vec<_> = self
            .fields
            .iter()
            .filter(|(_, spec)| spec.auto_increment)
            .collect();
        if auto.len() > 1 {
            return Err(MigrationError::descriptor(format!(
                "table '{}' declares more than one auto-increment field",
                self.table_name
            )));
        }
        if let Some((name, spec)) = auto.first() {
            if !spec.primary_key || !spec.ty.is_integer() {
                return Err(MigrationError::descriptor(format!(
                    "auto-increment field '{}.{}' must be an integer primary key",
                    self.table_name, name
                )));
            }
        }

        for index in &self.options.indexes {
            if let Some(missing) = index.fields.iter().find(|f| !self.has_column(f)) {
                return Err(MigrationError::descriptor(format!(
                    "index on '{}' names unknown field '{}'",
                    self.table_name, missing
                )));
            }
        }

        Ok(())
    }
}

/// Load descriptors from a JSON file containing an array of descriptors.
pub fn load_descriptors(path: impl AsRef<Path>) -> MigrateResult<Vec<TableDescriptor>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    parse_descriptors(&content).map_err(|e| match e {
        MigrationError::Json(err) => {
            MigrationError::descriptor(format!("{}: {}", path.display(), err))
        }
        other => other,
    })
}

/// Parse and validate descriptors from JSON text.
pub fn parse_descriptors(json: &str) -> MigrateResult<Vec<TableDescriptor>> {
    let descriptors: Vec<TableDescriptor> = serde_json::from_str(json)?;
    for descriptor in &descriptors {
        descriptor.validate()?;
    }
    Ok(descriptors)
}

/// Order descriptors so that referenced tables precede referencing ones.
///
/// The order is stable: among tables whose dependencies are satisfied,
/// declaration order wins. References to tables outside the set are ignored.
/// When a cycle remains, the rest keep their declaration order.
pub fn order_by_dependencies(
    descriptors: &[TableDescriptor],
) -> MigrateResult<Vec<TableDescriptor>> {
    let mut seen = HashSet::new();
    for d in descriptors {
        if !seen.insert(d.table_name.as_str()) {
            return Err(MigrationError::descriptor(format!(
                "table '{}' is declared more than once",
                d.table_name
            )));
        }
    }

    let positions: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.table_name.as_str(), i))
        .collect();

    let mut placed = vec![false; descriptors.len()];
    let mut ordered = Vec::with_capacity(descriptors.len());

    while ordered.len() < descriptors.len() {
        let next = descriptors.iter().enumerate().find(|(i, d)| {
            !placed[*i]
                && d.dependencies()
                    .iter()
                    .filter_map(|dep| positions.get(dep))
                    .all(|&j| placed[j])
        });

        match next {
            Some((i, d)) => {
                placed[i] = true;
                ordered.push(d.clone());
            }
            None => {
                tracing::warn!("cyclic table references, keeping declaration order for the rest");
                for (i, d) in descriptors.iter().enumerate() {
                    if !placed[i] {
                        placed[i] = true;
                        ordered.push(d.clone());
                    }
                }
            }
        }
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn roles() -> TableDescriptor {
        TableDescriptor::new("Roles", "roles")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
            .field("name", FieldSpec::new(ColumnType::String).not_null().unique())
            .timestamps(false)
    }

    #[test]
    fn test_parse_descriptor_json() {
        let json = r#"[{
            "name": "UserSystems",
            "tableName": "user_systems",
            "fields": {
                "id": { "type": "INTEGER", "primaryKey": true, "autoIncrement": true },
                "userId": { "type": "INTEGER", "allowNull": false,
                            "references": { "model": "users", "key": "id" } },
                "isActive": { "type": "BOOLEAN", "defaultValue": true }
            }
        }]"#;

        let descriptors = parse_descriptors(json).unwrap();
        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert_eq!(d.table_name, "user_systems");
        assert!(d.options.timestamps);
        assert_eq!(
            d.fields.keys().collect::<Vec<_>>(),
            vec!["id", "userId", "isActive"]
        );
        assert_eq!(d.auto_increment_key(), Some("id"));
        assert_eq!(d.dependencies(), vec!["users"]);
        assert_eq!(d.fields["isActive"].default_value, Some(Value::Bool(true)));
    }

    #[test]
    fn test_allows_null_defaults() {
        assert!(FieldSpec::new(ColumnType::String).allows_null());
        assert!(!FieldSpec::new(ColumnType::String).not_null().allows_null());
        assert!(!FieldSpec::new(ColumnType::Integer).auto_key().allows_null());
    }

    #[test]
    fn test_desired_fields_include_timestamps() {
        let with = roles().timestamps(true).desired_fields();
        assert_eq!(
            with.keys().collect::<Vec<_>>(),
            vec!["id", "name", CREATED_AT, UPDATED_AT]
        );
        assert!(!with[CREATED_AT].allows_null());

        let without = roles().desired_fields();
        assert_eq!(without.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_auto_increment() {
        let d = TableDescriptor::new("T", "t")
            .field("id", FieldSpec::new(ColumnType::String).auto_key());
        assert!(d.validate().is_err());

        let d = TableDescriptor::new("T", "t")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
            .field("seq", FieldSpec::new(ColumnType::Integer).auto_key());
        assert!(d.validate().is_err());

        assert!(roles().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_index_field() {
        let d = roles().index(IndexSpec {
            name: None,
            fields: vec!["missing".to_string()],
            unique: true,
        });
        assert!(matches!(d.validate(), Err(MigrationError::Descriptor(_))));
    }

    #[test]
    fn test_order_by_dependencies() {
        let users = TableDescriptor::new("Users", "users")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key());
        let links = TableDescriptor::new("UserRoles", "user_roles")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
            .field("userId", FieldSpec::new(ColumnType::Integer).references("users", "id"))
            .field("roleId", FieldSpec::new(ColumnType::Integer).references("roles", "id"))
            .field("parentId", FieldSpec::new(ColumnType::Integer).references("user_roles", "id"))
            .field("siteId", FieldSpec::new(ColumnType::Integer).references("sites", "id"));

        let ordered = order_by_dependencies(&[links, users, roles()]).unwrap();
        let names: Vec<_> = ordered.iter().map(|d| d.table_name.as_str()).collect();
        assert_eq!(names, vec!["users", "roles", "user_roles"]);
    }

    #[test]
    fn test_order_keeps_cycles_in_declaration_order() {
        let a = TableDescriptor::new("A", "a")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
            .field("bId", FieldSpec::new(ColumnType::Integer).references("b", "id"));
        let b = TableDescriptor::new("B", "b")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
            .field("aId", FieldSpec::new(ColumnType::Integer).references("a", "id"));

        let ordered = order_by_dependencies(&[a, b]).unwrap();
        assert_eq!(ordered[0].table_name, "a");
        assert_eq!(ordered[1].table_name, "b");
    }

    #[test]
    fn test_order_rejects_duplicate_tables() {
        assert!(order_by_dependencies(&[roles(), roles()]).is_err());
    }

    #[test]
    fn test_index_name_for() {
        let index = IndexSpec {
            name: None,
            fields: vec!["level".into(), "defaultValueId".into()],
            unique: true,
        };
        assert_eq!(index.name_for("default_values"), "default_values_level_defaultValueId");
    }
}
