//! Drops uniqueness constraints that no longer match the declared model.
//!
//! Synchronization is best-effort. Introspection or drop failures are logged
//! and never abort the package run; the work happens inside a savepoint so a
//! failed statement leaves the enclosing transaction usable.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::descriptor::{FieldSpec, IndexSpec};
use crate::error::{MigrateResult, MigrationError};
use crate::session::{SchemaSession, UniqueConstraint};

const SAVEPOINT: &str = "strata_constraint_sync";

/// Select the constraints that should be dropped.
///
/// A constraint is kept when every one of its columns is declared
/// `unique: true`, or when its column set equals a declared unique index.
pub fn obsolete_constraints<'a>(
    existing: &'a [UniqueConstraint],
    fields: &IndexMap<String, FieldSpec>,
    indexes: &[IndexSpec],
) -> Vec<&'a UniqueConstraint> {
    let composite: Vec<BTreeSet<&str>> = indexes
        .iter()
        .filter(|index| index.unique)
        .map(|index| index.fields.iter().map(String::as_str).collect())
        .collect();

    existing
        .iter()
        .filter(|constraint| {
            let all_unique = !constraint.columns.is_empty()
                && constraint
                    .columns
                    .iter()
                    .all(|c| fields.get(c).is_some_and(|spec| spec.unique));
            let columns: BTreeSet<&str> = constraint.columns.iter().map(String::as_str).collect();
            !(all_unique || composite.contains(&columns))
        })
        .collect()
}

/// Drop obsolete uniqueness constraints on `table`.
///
/// Returns the names of the dropped constraints. Failures are logged and
/// yield an empty list.
pub async fn sync_unique_constraints<S: SchemaSession + ?Sized>(
    session: &S,
    table: &str,
    fields: &IndexMap<String, FieldSpec>,
    indexes: &[IndexSpec],
) -> MigrateResult<Vec<String>> {
    session.savepoint(SAVEPOINT).await?;

    match drop_obsolete(session, table, fields, indexes).await {
        Ok(dropped) => {
            session.release_savepoint(SAVEPOINT).await?;
            Ok(dropped)
        }
        Err(e) => {
            session.rollback_to_savepoint(SAVEPOINT).await?;
            warn!(table = %table, error = %e, "constraint sync skipped");
            Ok(Vec::new())
        }
    }
}

async fn drop_obsolete<S: SchemaSession + ?Sized>(
    session: &S,
    table: &str,
    fields: &IndexMap<String, FieldSpec>,
    indexes: &[IndexSpec],
) -> MigrateResult<Vec<String>> {
    let existing = session
        .unique_constraints(table)
        .await
        .map_err(|e| MigrationError::constraint(table, e.to_string()))?;
    debug!(table = %table, count = existing.len(), "introspected unique constraints");

    let mut dropped = Vec::new();
    for constraint in obsolete_constraints(&existing, fields, indexes) {
        session
            .drop_constraint(table, &constraint.name)
            .await
            .map_err(|e| MigrationError::constraint(table, e.to_string()))?;
        info!(
            table = %table,
            constraint = %constraint.name,
            columns = ?constraint.columns,
            "dropped obsolete unique constraint"
        );
        dropped.push(constraint.name.clone());
    }
    Ok(dropped)
}
