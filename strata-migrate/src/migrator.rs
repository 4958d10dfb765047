//! Per-table structural migration.
//!
//! A declared table is created when absent, left alone (apart from
//! constraint sync) when it matches its descriptor, and otherwise rebuilt:
//! backed up, dropped, recreated, and refilled from the backup.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compare::{Comparison, LiveColumn, compare};
use crate::constraints::sync_unique_constraints;
use crate::descriptor::TableDescriptor;
use crate::error::{MigrateResult, MigrationError};
use crate::model;
use crate::session::{Row, SchemaSession};

/// Suffix of the backup table used during a rebuild.
pub const BACKUP_SUFFIX: &str = "_temp_backup";

const DESCRIBE_SAVEPOINT: &str = "strata_describe";
const COPY_SAVEPOINT: &str = "strata_copy_row";

/// What to do when a backed-up row cannot be copied back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyFailurePolicy {
    /// Log the failure and drop the row.
    #[default]
    Skip,
    /// Fail the whole package run.
    Abort,
}

/// What happened to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// The table did not exist and was created.
    Created,
    /// The table matched its descriptor.
    Unchanged,
    /// The table was rebuilt.
    Rebuilt {
        /// Human-readable differences that triggered the rebuild.
        differences: Vec<String>,
        /// Rows copied back from the backup.
        copied: usize,
        /// Rows that failed to copy back.
        skipped: usize,
    },
}

impl fmt::Display for TableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Rebuilt {
                differences,
                copied,
                skipped,
            } => write!(
                f,
                "rebuilt ({} differences, {} rows copied, {} skipped)",
                differences.len(),
                copied,
                skipped
            ),
        }
    }
}

/// Result of migrating one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    /// Table name.
    pub table: String,
    /// Outcome.
    pub outcome: TableOutcome,
    /// Uniqueness constraints dropped by constraint sync.
    pub dropped_constraints: Vec<String>,
}

/// Brings single tables in line with their descriptors.
pub struct TableMigrator<'a, S: SchemaSession + ?Sized> {
    session: &'a S,
    on_copy_failure: CopyFailurePolicy,
}

impl<'a, S: SchemaSession + ?Sized> TableMigrator<'a, S> {
    /// Create a migrator borrowing the package transaction.
    pub fn new(session: &'a S) -> Self {
        Self {
            session,
            on_copy_failure: CopyFailurePolicy::default(),
        }
    }

    /// Set the copy-back failure policy.
    pub fn on_copy_failure(mut self, policy: CopyFailurePolicy) -> Self {
        self.on_copy_failure = policy;
        self
    }

    /// Migrate one table.
    pub async fn migrate(&self, descriptor: &TableDescriptor) -> MigrateResult<TableReport> {
        let table = descriptor.table_name.as_str();
        let desired = descriptor.desired_fields();

        let Some(live) = self.describe(table).await? else {
            info!(table = %table, "creating table");
            self.session.create_table(descriptor).await?;
            return Ok(TableReport {
                table: table.to_string(),
                outcome: TableOutcome::Created,
                dropped_constraints: Vec::new(),
            });
        };

        let comparison = compare(&live, &desired);
        if !comparison.needs_migration {
            debug!(table = %table, "table matches descriptor");
            let dropped = sync_unique_constraints(
                self.session,
                table,
                &desired,
                &descriptor.options.indexes,
            )
            .await?;
            return Ok(TableReport {
                table: table.to_string(),
                outcome: TableOutcome::Unchanged,
                dropped_constraints: dropped,
            });
        }

        let differences = comparison.describe();
        for line in &differences {
            info!(table = %table, "{}", line);
        }
        self.rebuild(descriptor, &comparison, differences).await
    }

    async fn describe(&self, table: &str) -> MigrateResult<Option<Vec<LiveColumn>>> {
        self.session.savepoint(DESCRIBE_SAVEPOINT).await?;
        match self.session.describe_table(table).await {
            Ok(live) => {
                self.session.release_savepoint(DESCRIBE_SAVEPOINT).await?;
                Ok(live)
            }
            Err(e) => {
                self.session.rollback_to_savepoint(DESCRIBE_SAVEPOINT).await?;
                warn!(table = %table, error = %e, "describe failed, treating table as absent");
                Ok(None)
            }
        }
    }

    async fn rebuild(
        &self,
        descriptor: &TableDescriptor,
        comparison: &Comparison,
        differences: Vec<String>,
    ) -> MigrateResult<TableReport> {
        let table = descriptor.table_name.as_str();
        let backup = format!("{}{}", table, BACKUP_SUFFIX);
        let desired = descriptor.desired_fields();

        info!(table = %table, backup = %backup, "rebuilding table");
        self.session.drop_table(&backup).await?;
        self.session.copy_table(table, &backup).await?;
        self.session.drop_table(table).await?;
        self.session.create_table(descriptor).await?;

        let dropped = sync_unique_constraints(
            self.session,
            table,
            &desired,
            &descriptor.options.indexes,
        )
        .await?;

        let shared = &comparison.shared_fields;
        let (copied, skipped) = if shared.iter().any(|f| descriptor.fields.contains_key(f)) {
            let rows = self.session.select_all(&backup).await?;
            self.copy_back(descriptor, shared, rows).await?
        } else {
            info!(table = %table, "no declared field survives, skipping copy-back");
            (0, 0)
        };

        self.session.drop_table(&backup).await?;

        if let Some(key) = descriptor.auto_increment_key() {
            let value = self.session.reset_sequence(table, key).await?;
            debug!(table = %table, column = %key, value = ?value, "sequence reset");
        }

        info!(table = %table, copied, skipped, "table rebuilt");
        Ok(TableReport {
            table: table.to_string(),
            outcome: TableOutcome::Rebuilt {
                differences,
                copied,
                skipped,
            },
            dropped_constraints: dropped,
        })
    }

    async fn copy_back(
        &self,
        descriptor: &TableDescriptor,
        shared: &[String],
        rows: Vec<Row>,
    ) -> MigrateResult<(usize, usize)> {
        let table = descriptor.table_name.as_str();
        let mut copied = 0;
        let mut skipped = 0;

        for row in rows {
            let reduced: Row = row
                .into_iter()
                .filter(|(column, _)| shared.contains(column))
                .collect();

            self.session.savepoint(COPY_SAVEPOINT).await?;
            match model::create(self.session, descriptor, &reduced).await {
                Ok(_) => {
                    self.session.release_savepoint(COPY_SAVEPOINT).await?;
                    copied += 1;
                }
                Err(e) => {
                    self.session.rollback_to_savepoint(COPY_SAVEPOINT).await?;
                    match self.on_copy_failure {
                        CopyFailurePolicy::Skip => {
                            warn!(
                                table = %table,
                                row = ?reduced,
                                error = %e,
                                "row skipped during copy-back"
                            );
                            skipped += 1;
                        }
                        CopyFailurePolicy::Abort => {
                            return Err(MigrationError::row_copy(table, e.to_string()));
                        }
                    }
                }
            }
        }

        Ok((copied, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(TableOutcome::Created.to_string(), "created");
        let rebuilt = TableOutcome::Rebuilt {
            differences: vec!["+ field added: x".into()],
            copied: 3,
            skipped: 1,
        };
        assert_eq!(
            rebuilt.to_string(),
            "rebuilt (1 differences, 3 rows copied, 1 skipped)"
        );
    }

    #[test]
    fn test_policy_deserializes_lowercase() {
        let policy: CopyFailurePolicy = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(policy, CopyFailurePolicy::Abort);
        assert_eq!(CopyFailurePolicy::default(), CopyFailurePolicy::Skip);
    }
}
