//! Persistent identity mapping for seed records.
//!
//! Each mapping row ties the logical identity of a seed record, the
//! `(level, defaultValueId, tableName)` triple, to the primary key of the
//! row currently backing it.

use std::fmt;

use serde_json::{Value, json};

use crate::descriptor::{FieldSpec, IndexSpec, TableDescriptor};
use crate::error::{MigrateResult, MigrationError};
use crate::model;
use crate::session::{Row, SchemaSession};
use crate::types::ColumnType;

/// Default name of the mapping table.
pub const DEFAULT_VALUES_TABLE: &str = "default_values";

const LEVEL: &str = "level";
const DEFAULT_VALUE_ID: &str = "defaultValueId";
const TABLE_NAME: &str = "tableName";
const RECORD_ID: &str = "recordId";

/// Logical identity of a seed record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey {
    /// Owning level.
    pub level: String,
    /// Level-scoped seed id.
    pub default_value_id: i64,
    /// Table holding the backing row.
    pub table_name: String,
}

impl MappingKey {
    /// Create a key.
    pub fn new(
        level: impl Into<String>,
        default_value_id: i64,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            level: level.into(),
            default_value_id,
            table_name: table_name.into(),
        }
    }

    fn filter(&self) -> Row {
        let mut filter = Row::new();
        filter.insert(LEVEL.to_string(), json!(self.level));
        filter.insert(DEFAULT_VALUE_ID.to_string(), json!(self.default_value_id));
        filter.insert(TABLE_NAME.to_string(), json!(self.table_name));
        filter
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} -> {}", self.level, self.default_value_id, self.table_name)
    }
}

/// A stored mapping row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Mapping row id.
    pub id: i64,
    /// Logical identity.
    pub key: MappingKey,
    /// Primary key of the backing row.
    pub record_id: i64,
}

impl MappingEntry {
    /// Read an entry from a mapping table row.
    pub fn from_row(row: &Row) -> MigrateResult<Self> {
        let int = |column: &str| {
            row.get(column).and_then(Value::as_i64).ok_or_else(|| {
                MigrationError::database(format!("mapping row has no integer '{}'", column))
            })
        };
        let text = |column: &str| {
            row.get(column)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    MigrationError::database(format!("mapping row has no string '{}'", column))
                })
        };

        Ok(Self {
            id: int("id")?,
            key: MappingKey {
                level: text(LEVEL)?,
                default_value_id: int(DEFAULT_VALUE_ID)?,
                table_name: text(TABLE_NAME)?,
            },
            record_id: int(RECORD_ID)?,
        })
    }
}

/// Descriptor of the mapping table.
pub fn mapping_descriptor(table_name: &str) -> TableDescriptor {
    TableDescriptor::new("DefaultValue", table_name)
        .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
        .field(LEVEL, FieldSpec::new(ColumnType::String).not_null())
        .field(DEFAULT_VALUE_ID, FieldSpec::new(ColumnType::Integer).not_null())
        .field(TABLE_NAME, FieldSpec::new(ColumnType::String).not_null())
        .field(RECORD_ID, FieldSpec::new(ColumnType::Integer).not_null())
        .index(IndexSpec {
            name: Some(format!("{}_identity_key", table_name)),
            fields: vec![LEVEL.into(), DEFAULT_VALUE_ID.into(), TABLE_NAME.into()],
            unique: true,
        })
}

/// Storage of seed identity mappings.
#[async_trait::async_trait]
pub trait MappingRepository: Send + Sync {
    /// All mappings owned by a level.
    async fn for_level(&self, level: &str) -> MigrateResult<Vec<MappingEntry>>;

    /// The mapping for a logical identity.
    async fn find(&self, key: &MappingKey) -> MigrateResult<Option<MappingEntry>>;

    /// Record a new mapping.
    async fn insert(&self, key: &MappingKey, record_id: i64) -> MigrateResult<MappingEntry>;

    /// Point an existing mapping at a different backing row.
    async fn update_record_id(&self, entry: &MappingEntry, record_id: i64) -> MigrateResult<()>;

    /// Remove a mapping.
    async fn delete(&self, entry: &MappingEntry) -> MigrateResult<()>;

    /// The current backing record id for a logical identity.
    async fn resolve(&self, key: &MappingKey) -> MigrateResult<Option<i64>> {
        Ok(self.find(key).await?.map(|entry| entry.record_id))
    }
}

/// Mapping repository stored in a table reached through a session.
pub struct SessionMappings<'a, S: SchemaSession + ?Sized> {
    session: &'a S,
    descriptor: TableDescriptor,
}

impl<'a, S: SchemaSession + ?Sized> SessionMappings<'a, S> {
    /// Use the mapping table `table_name` through `session`.
    pub fn new(session: &'a S, table_name: &str) -> Self {
        Self {
            session,
            descriptor: mapping_descriptor(table_name),
        }
    }

    /// Descriptor of the underlying table.
    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    fn table(&self) -> &str {
        &self.descriptor.table_name
    }
}

#[async_trait::async_trait]
impl<'a, S: SchemaSession + ?Sized> MappingRepository for SessionMappings<'a, S> {
    async fn for_level(&self, level: &str) -> MigrateResult<Vec<MappingEntry>> {
        let mut filter = Row::new();
        filter.insert(LEVEL.to_string(), json!(level));
        self.session
            .select_where(self.table(), &filter)
            .await?
            .iter()
            .map(MappingEntry::from_row)
            .collect()
    }

    async fn find(&self, key: &MappingKey) -> MigrateResult<Option<MappingEntry>> {
        let rows = self.session.select_where(self.table(), &key.filter()).await?;
        rows.first().map(MappingEntry::from_row).transpose()
    }

    async fn insert(&self, key: &MappingKey, record_id: i64) -> MigrateResult<MappingEntry> {
        let mut payload = key.filter();
        payload.insert(RECORD_ID.to_string(), json!(record_id));
        let row = model::create(self.session, &self.descriptor, &payload).await?;
        MappingEntry::from_row(&row)
    }

    async fn update_record_id(&self, entry: &MappingEntry, record_id: i64) -> MigrateResult<()> {
        let mut current = Row::new();
        current.insert(RECORD_ID.to_string(), json!(entry.record_id));
        let mut payload = Row::new();
        payload.insert(RECORD_ID.to_string(), json!(record_id));

        if let Some(changes) = model::prepare_update(&self.descriptor, &current, &payload) {
            self.session
                .update_row(&self.descriptor, "id", &json!(entry.id), &changes)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, entry: &MappingEntry) -> MigrateResult<()> {
        self.session
            .delete_row(self.table(), "id", &json!(entry.id))
            .await?;
        Ok(())
    }
}
