//! Package-level orchestration.
//!
//! A package run borrows one transaction: the mapping table is brought up to
//! date, every declared table is migrated in dependency order, every level
//! owned by the package is reconciled, and sequences are reset. The whole
//! run then commits, or rolls back on the first fatal error.

use std::time::Instant;

use indexmap::IndexMap;
use tracing::{error, info, warn};

use crate::descriptor::{TableDescriptor, order_by_dependencies};
use crate::error::{MigrateResult, MigrationError};
use crate::mapping::{DEFAULT_VALUES_TABLE, SessionMappings};
use crate::migrator::{CopyFailurePolicy, TableMigrator, TableOutcome, TableReport};
use crate::reconcile::{LevelReport, SeedReconciler, reset_sequences};
use crate::seed::SeedSet;
use crate::session::{SchemaSession, TransactionalSession};

/// Configuration for a package run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Name of the seed identity mapping table.
    pub mapping_table: String,
    /// What to do when a row cannot be copied back after a rebuild.
    pub on_copy_failure: CopyFailurePolicy,
    /// Roll back instead of committing.
    pub dry_run: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            mapping_table: DEFAULT_VALUES_TABLE.to_string(),
            on_copy_failure: CopyFailurePolicy::Skip,
            dry_run: false,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mapping table name.
    pub fn mapping_table(mut self, name: impl Into<String>) -> Self {
        self.mapping_table = name.into();
        self
    }

    /// Set the copy-back failure policy.
    pub fn on_copy_failure(mut self, policy: CopyFailurePolicy) -> Self {
        self.on_copy_failure = policy;
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Everything one pipeline run owns.
#[derive(Debug, Clone, Default)]
pub struct Package {
    /// Package name.
    pub name: String,
    /// Tables the package declares.
    pub descriptors: Vec<TableDescriptor>,
    /// Seed levels the package owns, reconciled in order.
    pub levels: Vec<SeedSet>,
    /// Tables declared by packages that ran before this one. Seeds may
    /// target them; they are never migrated by this package.
    pub upstream: Vec<TableDescriptor>,
}

impl Package {
    /// Create an empty package.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a table.
    pub fn descriptor(mut self, descriptor: TableDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Add tables.
    pub fn descriptors(mut self, descriptors: impl IntoIterator<Item = TableDescriptor>) -> Self {
        self.descriptors.extend(descriptors);
        self
    }

    /// Add a seed level.
    pub fn level(mut self, seeds: SeedSet) -> Self {
        self.levels.push(seeds);
        self
    }

    /// Make tables of earlier packages available to seeds.
    pub fn upstream(mut self, descriptors: impl IntoIterator<Item = TableDescriptor>) -> Self {
        self.upstream.extend(descriptors);
        self
    }
}

/// Result of a package run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Package name.
    pub package: String,
    /// Per-table outcomes, mapping table first.
    pub tables: Vec<TableReport>,
    /// Per-level seed counts.
    pub levels: Vec<LevelReport>,
    /// Sequences reset after seeding, with their new values.
    pub sequences: Vec<(String, i64)>,
    /// Whether the transaction was committed.
    pub committed: bool,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl RunReport {
    /// Tables with the given outcome kind.
    pub fn count(&self, matches: impl Fn(&TableOutcome) -> bool) -> usize {
        self.tables.iter().filter(|t| matches(&t.outcome)).count()
    }

    /// Whether any table or seed was changed.
    pub fn has_changes(&self) -> bool {
        self.tables
            .iter()
            .any(|t| t.outcome != TableOutcome::Unchanged || !t.dropped_constraints.is_empty())
            || self.levels.iter().any(|l| l.mutations() > 0)
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let created = self.count(|o| matches!(o, TableOutcome::Created));
        let rebuilt = self.count(|o| matches!(o, TableOutcome::Rebuilt { .. }));
        let seeded: usize = self.levels.iter().map(LevelReport::mutations).sum();

        let mut parts = Vec::new();
        if created > 0 {
            parts.push(format!("{} created", created));
        }
        if rebuilt > 0 {
            parts.push(format!("{} rebuilt", rebuilt));
        }
        if seeded > 0 {
            parts.push(format!("{} seed changes", seeded));
        }

        if parts.is_empty() {
            format!("{}: up to date in {}ms", self.package, self.duration_ms)
        } else {
            format!("{}: {} in {}ms", self.package, parts.join(", "), self.duration_ms)
        }
    }
}

/// Drives the table migrator and seed reconciler for one package.
pub struct Coordinator {
    config: MigrationConfig,
}

impl Coordinator {
    /// Create a coordinator.
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Run the pipeline on a session without ending it.
    pub async fn run<S: SchemaSession + ?Sized>(
        &self,
        package: &Package,
        session: &S,
    ) -> MigrateResult<RunReport> {
        let start = Instant::now();
        info!(package = %package.name, "migrating package");

        for descriptor in &package.descriptors {
            descriptor.validate()?;
            if descriptor.table_name == self.config.mapping_table {
                return Err(MigrationError::descriptor(format!(
                    "table '{}' is reserved for seed mappings",
                    descriptor.table_name
                )));
            }
        }
        let ordered = order_by_dependencies(&package.descriptors)?;

        let mappings = SessionMappings::new(session, &self.config.mapping_table);
        let migrator = TableMigrator::new(session).on_copy_failure(self.config.on_copy_failure);

        let mut tables = Vec::with_capacity(ordered.len() + 1);
        tables.push(migrator.migrate(mappings.descriptor()).await?);
        for descriptor in &ordered {
            tables.push(migrator.migrate(descriptor).await?);
        }

        let mut catalog: IndexMap<String, TableDescriptor> = package
            .upstream
            .iter()
            .map(|d| (d.table_name.clone(), d.clone()))
            .collect();
        for descriptor in &ordered {
            catalog.insert(descriptor.table_name.clone(), descriptor.clone());
        }

        let reconciler = SeedReconciler::new(session, &mappings, &catalog);
        let mut levels = Vec::with_capacity(package.levels.len());
        for seeds in &package.levels {
            levels.push(reconciler.reconcile(seeds).await?);
        }

        let mut sequence_tables = ordered.clone();
        for seeds in &package.levels {
            for table in seeds.tables.keys() {
                if sequence_tables.iter().any(|d| &d.table_name == table) {
                    continue;
                }
                if let Some(descriptor) = catalog.get(table) {
                    sequence_tables.push(descriptor.clone());
                }
            }
        }
        let sequences = reset_sequences(session, &sequence_tables).await?;

        let report = RunReport {
            package: package.name.clone(),
            tables,
            levels,
            sequences,
            committed: false,
            duration_ms: start.elapsed().as_millis() as i64,
        };
        info!(package = %package.name, "{}", report.summary());
        Ok(report)
    }

    /// Run the pipeline and end the session.
    ///
    /// Commits on success unless in dry-run mode. Any error rolls the
    /// session back and is returned.
    pub async fn execute<S: TransactionalSession>(
        &self,
        package: &Package,
        session: S,
    ) -> MigrateResult<RunReport> {
        let result = self.run(package, &session).await;
        match result {
            Ok(mut report) => {
                if self.config.dry_run {
                    session.rollback().await?;
                    info!(package = %package.name, "dry run, changes rolled back");
                } else {
                    session.commit().await?;
                    report.committed = true;
                    info!(package = %package.name, "package committed");
                }
                Ok(report)
            }
            Err(e) => {
                error!(package = %package.name, error = %e, "migration failed, rolling back");
                if let Err(rollback) = session.rollback().await {
                    warn!(package = %package.name, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::new()
            .mapping_table("seed_map")
            .on_copy_failure(CopyFailurePolicy::Abort)
            .dry_run(true);
        assert_eq!(config.mapping_table, "seed_map");
        assert_eq!(config.on_copy_failure, CopyFailurePolicy::Abort);
        assert!(config.dry_run);
        assert_eq!(MigrationConfig::default().mapping_table, DEFAULT_VALUES_TABLE);
    }

    #[test]
    fn test_summary() {
        let mut report = RunReport {
            package: "core".into(),
            duration_ms: 12,
            ..Default::default()
        };
        assert_eq!(report.summary(), "core: up to date in 12ms");
        assert!(!report.has_changes());

        report.tables.push(TableReport {
            table: "roles".into(),
            outcome: TableOutcome::Created,
            dropped_constraints: Vec::new(),
        });
        report.levels.push(LevelReport {
            level: "core".into(),
            inserted: 2,
            ..Default::default()
        });
        assert_eq!(report.summary(), "core: 1 created, 2 seed changes in 12ms");
        assert!(report.has_changes());
    }
}
