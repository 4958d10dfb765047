//! Seed reconciliation.
//!
//! For one level, converge the backing rows of its declared seed records
//! against the mapping table: prune identities the level no longer declares,
//! then update, repair, adopt or insert each declared record in declaration
//! order. Identity lives in the mapping, never in the backing row's key, so
//! repeated runs and table rebuilds keep seeds stable.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::descriptor::TableDescriptor;
use crate::error::{MigrateResult, MigrationError};
use crate::mapping::{MappingKey, MappingRepository};
use crate::model;
use crate::seed::{SeedRecord, SeedSet};
use crate::session::{Row, SchemaSession};

/// Counts of what reconciliation did for one level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelReport {
    /// Level name.
    pub level: String,
    /// Mappings removed along with their backing rows.
    pub pruned: usize,
    /// New backing rows created.
    pub inserted: usize,
    /// Backing rows updated in place.
    pub updated: usize,
    /// Pre-existing rows taken over by a new mapping.
    pub adopted: usize,
    /// Dangling mappings pointed at a fresh row.
    pub repaired: usize,
    /// Records already in the declared state.
    pub unchanged: usize,
}

impl LevelReport {
    fn new(level: &str) -> Self {
        Self {
            level: level.to_string(),
            ..Default::default()
        }
    }

    /// Number of mapping or backing-row mutations.
    pub fn mutations(&self) -> usize {
        self.pruned + self.inserted + self.updated + self.adopted + self.repaired
    }
}

impl fmt::Display for LevelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} inserted, {} updated, {} adopted, {} repaired, {} pruned, {} unchanged",
            self.level,
            self.inserted,
            self.updated,
            self.adopted,
            self.repaired,
            self.pruned,
            self.unchanged
        )
    }
}

enum Converged {
    Inserted,
    Updated,
    Adopted,
    Repaired,
    Unchanged,
}

/// Reconciles seed levels against the mapping repository.
pub struct SeedReconciler<'a, S: SchemaSession + ?Sized, M: MappingRepository> {
    session: &'a S,
    mappings: &'a M,
    catalog: &'a IndexMap<String, TableDescriptor>,
}

impl<'a, S: SchemaSession + ?Sized, M: MappingRepository> SeedReconciler<'a, S, M> {
    /// Create a reconciler over the tables known to the run.
    pub fn new(
        session: &'a S,
        mappings: &'a M,
        catalog: &'a IndexMap<String, TableDescriptor>,
    ) -> Self {
        Self {
            session,
            mappings,
            catalog,
        }
    }

    /// Reconcile one level.
    pub async fn reconcile(&self, seeds: &SeedSet) -> MigrateResult<LevelReport> {
        let level = seeds.level.as_str();
        let mut report = LevelReport::new(level);

        for (table, _) in seeds.records() {
            self.descriptor(table)?;
        }

        report.pruned = self.prune(seeds).await?;

        for (table, record) in seeds.records() {
            let descriptor = self.descriptor(table)?;
            match self.converge(level, descriptor, record).await? {
                Converged::Inserted => report.inserted += 1,
                Converged::Updated => report.updated += 1,
                Converged::Adopted => report.adopted += 1,
                Converged::Repaired => report.repaired += 1,
                Converged::Unchanged => report.unchanged += 1,
            }
        }

        info!(level = %level, "{}", report);
        Ok(report)
    }

    fn descriptor(&self, table: &str) -> MigrateResult<&'a TableDescriptor> {
        let catalog = self.catalog;
        catalog.get(table).ok_or_else(|| {
            MigrationError::seed(format!("seed records target undeclared table '{}'", table))
        })
    }

    /// Remove mappings, and their backing rows, that the level no longer declares.
    async fn prune(&self, seeds: &SeedSet) -> MigrateResult<usize> {
        let declared = seeds.declared_ids();

        let mut pruned = 0;
        for entry in self.mappings.for_level(&seeds.level).await? {
            let key = &entry.key;
            if declared.contains(&key.default_value_id) {
                continue;
            }

            match self.catalog.get(&key.table_name) {
                Some(descriptor) => {
                    let column = model::seeded_key(descriptor)?;
                    let deleted = self
                        .session
                        .delete_row(&key.table_name, column, &json!(entry.record_id))
                        .await?;
                    debug!(
                        mapping = %key,
                        record_id = entry.record_id,
                        deleted,
                        "deleted backing row"
                    );
                }
                None => {
                    warn!(mapping = %key, "table no longer declared, keeping backing row");
                }
            }

            self.mappings.delete(&entry).await?;
            info!(mapping = %key, record_id = entry.record_id, "pruned seed record");
            pruned += 1;
        }
        Ok(pruned)
    }

    async fn converge(
        &self,
        level: &str,
        descriptor: &TableDescriptor,
        record: &SeedRecord,
    ) -> MigrateResult<Converged> {
        let table = descriptor.table_name.as_str();
        let key_column = model::seeded_key(descriptor)?;
        let key = MappingKey::new(level, record.default_value_id, table);
        let payload = &record.payload;

        match self.mappings.find(&key).await? {
            Some(entry) => {
                let backing = self
                    .session
                    .find_row(table, key_column, &json!(entry.record_id))
                    .await?;
                match backing {
                    Some(current) => {
                        if self.apply_changes(descriptor, key_column, &current, payload).await? {
                            debug!(
                                mapping = %key,
                                record_id = entry.record_id,
                                "updated backing row"
                            );
                            Ok(Converged::Updated)
                        } else {
                            Ok(Converged::Unchanged)
                        }
                    }
                    None => {
                        let record_id = self
                            .adopt_or_insert(descriptor, key_column, payload)
                            .await?;
                        self.mappings.update_record_id(&entry, record_id).await?;
                        info!(
                            mapping = %key,
                            from = entry.record_id,
                            to = record_id,
                            "repaired dangling mapping"
                        );
                        Ok(Converged::Repaired)
                    }
                }
            }
            None => {
                let existing = self.literal_match(table, key_column, payload).await?;
                let (record_id, outcome) = match existing {
                    Some(current) => {
                        self.apply_changes(descriptor, key_column, &current, payload)
                            .await?;
                        (model::record_id(descriptor, &current)?, Converged::Adopted)
                    }
                    None => {
                        let row = model::create(self.session, descriptor, payload).await?;
                        (model::record_id(descriptor, &row)?, Converged::Inserted)
                    }
                };
                self.mappings.insert(&key, record_id).await?;
                debug!(mapping = %key, record_id, "mapped seed record");
                Ok(outcome)
            }
        }
    }

    /// A row whose key equals the payload's literal key value, if any.
    async fn literal_match(
        &self,
        table: &str,
        key_column: &str,
        payload: &Row,
    ) -> MigrateResult<Option<Row>> {
        match payload.get(key_column) {
            Some(value) if !value.is_null() => {
                self.session.find_row(table, key_column, value).await
            }
            _ => Ok(None),
        }
    }

    async fn adopt_or_insert(
        &self,
        descriptor: &TableDescriptor,
        key_column: &str,
        payload: &Row,
    ) -> MigrateResult<i64> {
        let table = descriptor.table_name.as_str();
        if let Some(current) = self.literal_match(table, key_column, payload).await? {
            self.apply_changes(descriptor, key_column, &current, payload)
                .await?;
            return model::record_id(descriptor, &current);
        }
        let row = model::create(self.session, descriptor, payload).await?;
        model::record_id(descriptor, &row)
    }

    /// Overwrite differing non-key fields. Returns whether anything changed.
    async fn apply_changes(
        &self,
        descriptor: &TableDescriptor,
        key_column: &str,
        current: &Row,
        payload: &Row,
    ) -> MigrateResult<bool> {
        let Some(changes) = model::prepare_update(descriptor, current, payload) else {
            return Ok(false);
        };
        let key = current.get(key_column).cloned().unwrap_or(Value::Null);
        self.session
            .update_row(descriptor, key_column, &key, &changes)
            .await?;
        Ok(true)
    }
}

/// Reset every auto-increment key sequence of the given tables.
///
/// Returns the tables whose sequence was reset with the new value.
pub async fn reset_sequences<S: SchemaSession + ?Sized>(
    session: &S,
    descriptors: &[TableDescriptor],
) -> MigrateResult<Vec<(String, i64)>> {
    let mut reset = Vec::new();
    for descriptor in descriptors {
        let Some(key) = descriptor.auto_increment_key() else {
            continue;
        };
        if let Some(value) = session.reset_sequence(&descriptor.table_name, key).await? {
            debug!(table = %descriptor.table_name, value, "sequence reset");
            reset.push((descriptor.table_name.clone(), value));
        }
    }
    Ok(reset)
}
