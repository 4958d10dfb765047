//! Seed ("default value") records grouped by level.
//!
//! A seed file maps table names to ordered record lists. Every record carries
//! an integer `id`, which is its `defaultValueId`: stable and unique within
//! the level, not within the table.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::error::{MigrateResult, MigrationError};

/// Field carrying the level-scoped identity of a seed record.
pub const SEED_ID_FIELD: &str = "id";

/// One declared reference-data row.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRecord {
    /// Level-scoped identity.
    pub default_value_id: i64,
    /// Field values, including `id`.
    pub payload: IndexMap<String, Value>,
}

impl SeedRecord {
    /// Create a record from its payload; `id` is taken from the payload.
    pub fn new(payload: IndexMap<String, Value>) -> MigrateResult<Self> {
        let default_value_id = payload
            .get(SEED_ID_FIELD)
            .and_then(Value::as_i64)
            .ok_or_else(|| MigrationError::seed("seed record has no integer 'id'"))?;
        Ok(Self {
            default_value_id,
            payload,
        })
    }
}

/// The seed records one level declares, grouped by table in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedSet {
    /// Owning level.
    pub level: String,
    /// Records by table name.
    pub tables: IndexMap<String, Vec<SeedRecord>>,
}

impl SeedSet {
    /// Create an empty set for a level.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            tables: IndexMap::new(),
        }
    }

    /// Add a record to a table.
    pub fn record(mut self, table: impl Into<String>, payload: Value) -> MigrateResult<Self> {
        let Value::Object(map) = payload else {
            return Err(MigrationError::seed("seed record must be a JSON object"));
        };
        let record = SeedRecord::new(map.into_iter().collect())?;
        self.tables.entry(table.into()).or_default().push(record);
        self.check_unique_ids()?;
        Ok(self)
    }

    /// Parse a seed file body for a level.
    ///
    /// Records without an integer `id` are skipped with a warning. A
    /// non-positive id, or an id repeated anywhere in the level, is an error.
    pub fn from_json(level: impl Into<String>, json: &str) -> MigrateResult<Self> {
        let level = level.into();
        let raw: IndexMap<String, Vec<IndexMap<String, Value>>> = serde_json::from_str(json)?;

        let mut set = SeedSet::new(level.clone());
        for (table, records) in raw {
            let mut parsed = Vec::with_capacity(records.len());
            for payload in records {
                match payload.get(SEED_ID_FIELD).and_then(Value::as_i64) {
                    Some(id) if id <= 0 => {
                        return Err(MigrationError::seed(format!(
                            "record in '{}' has non-positive id {} (level '{}')",
                            table, id, level
                        )));
                    }
                    Some(_) => parsed.push(SeedRecord::new(payload)?),
                    None => {
                        warn!(
                            level = %level,
                            table = %table,
                            "seed record has no integer id, skipping"
                        );
                    }
                }
            }
            set.tables.insert(table, parsed);
        }

        set.check_unique_ids()?;
        Ok(set)
    }

    /// Load a seed file for a level.
    pub fn load(level: impl Into<String>, path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_json(level, &content).map_err(|e| match e {
            MigrationError::Json(err) => {
                MigrationError::seed(format!("{}: {}", path.display(), err))
            }
            other => other,
        })
    }

    /// Every `defaultValueId` declared by this level.
    pub fn declared_ids(&self) -> HashSet<i64> {
        self.records().map(|(_, r)| r.default_value_id).collect()
    }

    /// All records with their table, in declaration order.
    pub fn records(&self) -> impl Iterator<Item = (&str, &SeedRecord)> {
        self.tables
            .iter()
            .flat_map(|(table, records)| records.iter().map(move |r| (table.as_str(), r)))
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// Whether the level declares no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_unique_ids(&self) -> MigrateResult<()> {
        let mut owners: HashMap<i64, &str> = HashMap::new();
        for (table, record) in self.records() {
            if let Some(previous) = owners.insert(record.default_value_id, table) {
                return Err(MigrationError::seed(format!(
                    "duplicate id {} in '{}' and '{}' (ids must be unique within level '{}')",
                    record.default_value_id, previous, table, self.level
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_order() {
        let set = SeedSet::from_json(
            "forms",
            r#"{
                "systems": [{ "id": 1, "name": "mySpace" }],
                "access_roles": [
                    { "id": 2, "name": "admin" },
                    { "id": 3, "name": "public" },
                    { "id": 4, "name": "nologged" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(set.level, "forms");
        assert_eq!(set.len(), 4);
        let order: Vec<_> = set.records().map(|(t, r)| (t, r.default_value_id)).collect();
        assert_eq!(
            order,
            vec![("systems", 1), ("access_roles", 2), ("access_roles", 3), ("access_roles", 4)]
        );
        assert_eq!(set.declared_ids(), HashSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn test_duplicate_ids_across_tables_rejected() {
        let err = SeedSet::from_json(
            "core",
            r#"{ "roles": [{ "id": 1 }], "systems": [{ "id": 1 }] }"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("roles"));
        assert!(msg.contains("systems"));
    }

    #[test]
    fn test_record_without_id_is_skipped() {
        let set = SeedSet::from_json(
            "core",
            r#"{ "roles": [{ "name": "orphan" }, { "id": 5, "name": "kept" }] }"#,
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.tables["roles"][0].default_value_id, 5);
    }

    #[test]
    fn test_non_positive_id_rejected() {
        assert!(SeedSet::from_json("core", r#"{ "roles": [{ "id": 0 }] }"#).is_err());
    }

    #[test]
    fn test_builder() {
        let set = SeedSet::new("core")
            .record("roles", json!({ "id": 1, "name": "admin" }))
            .unwrap()
            .record("roles", json!({ "id": 2, "name": "public" }))
            .unwrap();
        assert_eq!(set.tables["roles"].len(), 2);
        assert!(
            SeedSet::new("core")
                .record("roles", json!({ "id": 1 }))
                .unwrap()
                .record("users", json!({ "id": 1 }))
                .is_err()
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.json");
        std::fs::write(&path, r#"{ "roles": [{ "id": 1, "name": "admin" }] }"#).unwrap();
        let set = SeedSet::load("core", &path).unwrap();
        assert_eq!(set.len(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(SeedSet::load("core", &path), Err(MigrationError::Seed(_))));
    }
}
