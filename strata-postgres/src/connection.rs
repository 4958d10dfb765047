//! PostgreSQL connection and transaction wrappers.

use deadpool_postgres::Object;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::PgResult;

/// Query parameters.
pub type Params<'p> = [&'p (dyn ToSql + Sync)];

/// A pooled PostgreSQL connection.
pub struct PgConnection {
    client: Object,
}

impl PgConnection {
    pub(crate) fn new(client: Object) -> Self {
        Self { client }
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &Params<'_>) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query");
        Ok(self.client.query(sql, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &Params<'_>) -> PgResult<u64> {
        debug!(sql = %sql, "Executing statement");
        Ok(self.client.execute(sql, params).await?)
    }

    /// Execute a batch of statements in a single round-trip.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        debug!(sql = %sql, "Executing batch");
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    /// Begin a transaction.
    pub async fn transaction(&mut self) -> PgResult<PgTransaction<'_>> {
        debug!("Beginning transaction");
        let txn = self.client.transaction().await?;
        Ok(PgTransaction { txn })
    }
}

/// A PostgreSQL transaction.
pub struct PgTransaction<'a> {
    txn: deadpool_postgres::Transaction<'a>,
}

impl<'a> PgTransaction<'a> {
    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &Params<'_>) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query in transaction");
        Ok(self.txn.query(sql, params).await?)
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(&self, sql: &str, params: &Params<'_>) -> PgResult<Option<Row>> {
        debug!(sql = %sql, "Executing query_opt in transaction");
        Ok(self.txn.query_opt(sql, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &Params<'_>) -> PgResult<u64> {
        debug!(sql = %sql, "Executing statement in transaction");
        Ok(self.txn.execute(sql, params).await?)
    }

    /// Execute a batch of statements.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        debug!(sql = %sql, "Executing batch in transaction");
        self.txn.batch_execute(sql).await?;
        Ok(())
    }

    /// Create a savepoint.
    pub async fn savepoint(&self, name: &str) -> PgResult<()> {
        debug!(name = %name, "Creating savepoint");
        self.txn.batch_execute(&format!("SAVEPOINT {}", name)).await?;
        Ok(())
    }

    /// Rollback to a savepoint.
    pub async fn rollback_to(&self, name: &str) -> PgResult<()> {
        debug!(name = %name, "Rolling back to savepoint");
        self.txn
            .batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .await?;
        Ok(())
    }

    /// Release a savepoint.
    pub async fn release_savepoint(&self, name: &str) -> PgResult<()> {
        debug!(name = %name, "Releasing savepoint");
        self.txn
            .batch_execute(&format!("RELEASE SAVEPOINT {}", name))
            .await?;
        Ok(())
    }

    /// Commit the transaction.
    pub async fn commit(self) -> PgResult<()> {
        debug!("Committing transaction");
        self.txn.commit().await?;
        Ok(())
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> PgResult<()> {
        debug!("Rolling back transaction");
        self.txn.rollback().await?;
        Ok(())
    }
}
