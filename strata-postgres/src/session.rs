//! [`SchemaSession`] over a PostgreSQL transaction.
//!
//! Rows cross the wire as JSON: reads use `row_to_json`, writes go through
//! `json_populate_record` so PostgreSQL converts each value to its column
//! type.

use serde_json::Value;
use strata_migrate::{
    LiveColumn, MigrateResult, MigrationError, Row, SchemaSession, TableDescriptor,
    TransactionalSession, UniqueConstraint,
};
use tracing::debug;

use crate::connection::{Params, PgTransaction};
use crate::ddl;
use crate::error::PgError;

const DESCRIBE_SQL: &str = r#"
SELECT c.column_name::text,
       UPPER(c.data_type)::text || COALESCE('(' || c.character_maximum_length::text || ')', ''),
       c.is_nullable::text = 'YES',
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_name = tc.constraint_name
            AND k.table_schema = tc.table_schema
            AND k.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       )
FROM information_schema.columns c
WHERE c.table_schema::text = current_schema()
  AND c.table_name::text = $1
ORDER BY c.ordinal_position
"#;

const UNIQUE_CONSTRAINTS_SQL: &str = r#"
SELECT con.conname::text,
       array_agg(a.attname::text ORDER BY k.ord)
FROM pg_constraint con
JOIN pg_class rel ON rel.oid = con.conrelid
JOIN pg_namespace ns ON ns.oid = rel.relnamespace
CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = rel.oid AND a.attnum = k.attnum
WHERE con.contype = 'u'
  AND rel.relname::text = $1
  AND ns.nspname::text = current_schema()
GROUP BY con.conname
ORDER BY con.conname
"#;

/// A migration session on one PostgreSQL transaction.
pub struct PgSession<'a> {
    txn: PgTransaction<'a>,
}

impl<'a> PgSession<'a> {
    /// Wrap an open transaction.
    pub fn new(txn: PgTransaction<'a>) -> Self {
        Self { txn }
    }

    async fn rows(&self, sql: &str, params: &Params<'_>) -> MigrateResult<Vec<Row>> {
        let rows = self.txn.query(sql, params).await?;
        rows.iter()
            .map(|row| -> MigrateResult<Row> {
                let text: String = row.try_get(0).map_err(PgError::from)?;
                Ok(serde_json::from_str::<Row>(&text).map_err(PgError::from)?)
            })
            .collect()
    }
}

fn payload(row: &Row) -> Value {
    Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn keyed(column: &str, value: &Value) -> Value {
    let mut row = Row::new();
    row.insert(column.to_string(), value.clone());
    payload(&row)
}

#[async_trait::async_trait]
impl<'a> SchemaSession for PgSession<'a> {
    async fn describe_table(&self, table: &str) -> MigrateResult<Option<Vec<LiveColumn>>> {
        let rows = self
            .txn
            .query(DESCRIBE_SQL, &[&table])
            .await
            .map_err(|e| MigrationError::describe(table, e.to_string()))?;
        if rows.is_empty() {
            return Ok(None);
        }

        rows.iter()
            .map(|row| -> MigrateResult<LiveColumn> {
                Ok(LiveColumn::new(
                    row.try_get::<_, String>(0).map_err(PgError::from)?,
                    row.try_get::<_, String>(1).map_err(PgError::from)?,
                    row.try_get::<_, bool>(2).map_err(PgError::from)?,
                    row.try_get::<_, bool>(3).map_err(PgError::from)?,
                ))
            })
            .collect::<MigrateResult<Vec<_>>>()
            .map(Some)
    }

    async fn create_table(&self, descriptor: &TableDescriptor) -> MigrateResult<()> {
        let statements = ddl::create_table(descriptor)?;
        self.txn.batch_execute(&statements.join("\n")).await?;
        Ok(())
    }

    async fn copy_table(&self, source: &str, target: &str) -> MigrateResult<()> {
        self.txn.batch_execute(&ddl::copy_table(source, target)).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> MigrateResult<()> {
        self.txn.batch_execute(&ddl::drop_table(table)).await?;
        Ok(())
    }

    async fn select_all(&self, table: &str) -> MigrateResult<Vec<Row>> {
        self.rows(&ddl::select_all(table), &[]).await
    }

    async fn select_where(&self, table: &str, filter: &Row) -> MigrateResult<Vec<Row>> {
        let columns: Vec<&str> = filter.keys().map(String::as_str).collect();
        let filter = payload(filter);
        self.rows(&ddl::select_where(table, &columns), &[&filter])
            .await
    }

    async fn insert_row(&self, descriptor: &TableDescriptor, row: &Row) -> MigrateResult<Row> {
        let table = descriptor.table_name.as_str();
        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        let values = payload(row);
        let mut stored = self
            .rows(&ddl::insert_row(table, &columns), &[&values])
            .await?;
        debug!(table = %table, "inserted row");
        stored
            .pop()
            .ok_or_else(|| {
                MigrationError::database(format!("insert into '{}' returned no row", table))
            })
    }

    async fn update_row(
        &self,
        descriptor: &TableDescriptor,
        key_column: &str,
        key: &Value,
        changes: &Row,
    ) -> MigrateResult<u64> {
        if changes.is_empty() {
            return Ok(0);
        }
        let table = descriptor.table_name.as_str();
        let columns: Vec<&str> = changes.keys().map(String::as_str).collect();
        let values = payload(changes);
        let key = keyed(key_column, key);
        let count = self
            .txn
            .execute(&ddl::update_row(table, key_column, &columns), &[&values, &key])
            .await?;
        Ok(count)
    }

    async fn delete_row(&self, table: &str, column: &str, value: &Value) -> MigrateResult<u64> {
        let key = keyed(column, value);
        Ok(self.txn.execute(&ddl::delete_row(table, column), &[&key]).await?)
    }

    async fn unique_constraints(&self, table: &str) -> MigrateResult<Vec<UniqueConstraint>> {
        let rows = self
            .txn
            .query(UNIQUE_CONSTRAINTS_SQL, &[&table])
            .await
            .map_err(|e| MigrationError::constraint(table, e.to_string()))?;
        rows.iter()
            .map(|row| -> MigrateResult<UniqueConstraint> {
                Ok(UniqueConstraint::new(
                    row.try_get::<_, String>(0).map_err(PgError::from)?,
                    row.try_get::<_, Vec<String>>(1).map_err(PgError::from)?,
                ))
            })
            .collect()
    }

    async fn drop_constraint(&self, table: &str, name: &str) -> MigrateResult<()> {
        self.txn
            .batch_execute(&ddl::drop_constraint(table, name))
            .await
            .map_err(|e| MigrationError::constraint(table, e.to_string()))
    }

    async fn reset_sequence(&self, table: &str, column: &str) -> MigrateResult<Option<i64>> {
        let row = self
            .txn
            .query_opt(&ddl::reset_sequence(table, column), &[])
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<_, Option<i64>>(0).map_err(PgError::from)?),
            None => Ok(None),
        }
    }

    async fn savepoint(&self, name: &str) -> MigrateResult<()> {
        Ok(self.txn.savepoint(name).await?)
    }

    async fn rollback_to_savepoint(&self, name: &str) -> MigrateResult<()> {
        Ok(self.txn.rollback_to(name).await?)
    }

    async fn release_savepoint(&self, name: &str) -> MigrateResult<()> {
        Ok(self.txn.release_savepoint(name).await?)
    }
}

#[async_trait::async_trait]
impl<'a> TransactionalSession for PgSession<'a> {
    async fn commit(self) -> MigrateResult<()> {
        self.txn
            .commit()
            .await
            .map_err(|e| MigrationError::transaction(e.to_string()))
    }

    async fn rollback(self) -> MigrateResult<()> {
        self.txn
            .rollback()
            .await
            .map_err(|e| MigrationError::transaction(e.to_string()))
    }
}
