//! The transaction-scoped database handle the engine borrows.
//!
//! A [`SchemaSession`] is one open transaction. The coordinator owns it for
//! the duration of a package run; the table migrator, constraint
//! synchronizer and seed reconciler borrow it in turn. Backends implement it
//! for their own transaction type.

use indexmap::IndexMap;
use serde_json::Value;

use crate::compare::LiveColumn;
use crate::descriptor::TableDescriptor;
use crate::error::MigrateResult;

/// A row as column name to JSON value.
pub type Row = IndexMap<String, Value>;

/// A named uniqueness constraint resolved to its columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Participating columns, in key order.
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    /// Create a constraint description.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// Operations available inside one migration transaction.
#[async_trait::async_trait]
pub trait SchemaSession: Send + Sync {
    /// Describe a table's columns. `None` when the table does not exist.
    async fn describe_table(&self, table: &str) -> MigrateResult<Option<Vec<LiveColumn>>>;

    /// Create a table, its constraints and indexes from a descriptor.
    async fn create_table(&self, descriptor: &TableDescriptor) -> MigrateResult<()>;

    /// Create `target` as a verbatim copy of `source` (structure and rows).
    async fn copy_table(&self, source: &str, target: &str) -> MigrateResult<()>;

    /// Drop a table, cascading to dependent objects. Missing tables are ignored.
    async fn drop_table(&self, table: &str) -> MigrateResult<()>;

    /// Read every row of a table.
    async fn select_all(&self, table: &str) -> MigrateResult<Vec<Row>>;

    /// Read the rows whose columns equal every value in `filter`.
    async fn select_where(&self, table: &str, filter: &Row) -> MigrateResult<Vec<Row>>;

    /// Find the row whose `column` equals `value`.
    async fn find_row(
        &self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> MigrateResult<Option<Row>> {
        let mut filter = Row::new();
        filter.insert(column.to_string(), value.clone());
        Ok(self.select_where(table, &filter).await?.into_iter().next())
    }

    /// Insert a row into a declared table and return it as stored.
    async fn insert_row(&self, descriptor: &TableDescriptor, row: &Row) -> MigrateResult<Row>;

    /// Set `changes` on the row whose `key_column` equals `key`.
    async fn update_row(
        &self,
        descriptor: &TableDescriptor,
        key_column: &str,
        key: &Value,
        changes: &Row,
    ) -> MigrateResult<u64>;

    /// Delete the row whose `column` equals `value`.
    async fn delete_row(&self, table: &str, column: &str, value: &Value) -> MigrateResult<u64>;

    /// List the named uniqueness constraints on a table.
    async fn unique_constraints(&self, table: &str) -> MigrateResult<Vec<UniqueConstraint>>;

    /// Drop a named constraint.
    async fn drop_constraint(&self, table: &str, name: &str) -> MigrateResult<()>;

    /// Reset the sequence behind `column` to `max(MAX(column), 1)` and return
    /// the new value. `None` when the column has no sequence.
    async fn reset_sequence(&self, table: &str, column: &str) -> MigrateResult<Option<i64>>;

    /// Open a savepoint.
    async fn savepoint(&self, name: &str) -> MigrateResult<()>;

    /// Undo everything since the savepoint.
    async fn rollback_to_savepoint(&self, name: &str) -> MigrateResult<()>;

    /// Forget a savepoint, keeping its changes.
    async fn release_savepoint(&self, name: &str) -> MigrateResult<()>;
}

/// A session that ends by committing or rolling back.
#[async_trait::async_trait]
pub trait TransactionalSession: SchemaSession + Sized {
    /// Make every change of this session durable.
    async fn commit(self) -> MigrateResult<()>;

    /// Discard every change of this session.
    async fn rollback(self) -> MigrateResult<()>;
}
