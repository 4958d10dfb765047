//! In-memory transactional backend.
//!
//! [`MemoryDatabase`] holds committed tables; [`MemoryDatabase::begin`] opens a
//! [`MemorySession`] working on a private copy that replaces the committed
//! state on commit. NOT NULL, primary keys, uniqueness constraints,
//! auto-increment sequences and savepoints behave like their PostgreSQL
//! counterparts, and reported column types use PostgreSQL spellings, so the
//! whole pipeline can run without a server.
//!
//! As in PostgreSQL, a failed statement aborts the session: every later
//! statement fails until the session rolls back to a savepoint. Failures can
//! be injected with [`MemoryDatabase::fail_next`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::compare::LiveColumn;
use crate::descriptor::TableDescriptor;
use crate::error::{MigrateResult, MigrationError};
use crate::model::values_equal;
use crate::session::{Row, SchemaSession, TransactionalSession, UniqueConstraint};

#[derive(Debug, Clone)]
struct MemColumn {
    name: String,
    reported_type: String,
    allow_null: bool,
    primary_key: bool,
    default: Option<Value>,
    serial: bool,
}

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<MemColumn>,
    rows: Vec<Row>,
    uniques: Vec<UniqueConstraint>,
    sequence: i64,
}

impl MemTable {
    fn from_descriptor(descriptor: &TableDescriptor) -> Self {
        let table = &descriptor.table_name;
        let fields = descriptor.desired_fields();

        let columns = fields
            .iter()
            .map(|(name, spec)| MemColumn {
                name: name.clone(),
                reported_type: spec.ty.postgres_reported().to_string(),
                allow_null: spec.allows_null(),
                primary_key: spec.primary_key,
                default: spec.default_value.clone(),
                serial: spec.primary_key && spec.auto_increment,
            })
            .collect();

        let mut uniques: Vec<UniqueConstraint> = fields
            .iter()
            .filter(|(_, spec)| spec.unique && !spec.primary_key)
            .map(|(name, _)| {
                UniqueConstraint::new(format!("{}_{}_key", table, name), vec![name.clone()])
            })
            .collect();
        uniques.extend(
            descriptor
                .options
                .indexes
                .iter()
                .filter(|index| index.unique)
                .map(|index| UniqueConstraint::new(index.name_for(table), index.fields.clone())),
        );

        Self {
            columns,
            rows: Vec::new(),
            uniques,
            sequence: 0,
        }
    }

    fn serial_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.serial)
            .map(|c| c.name.as_str())
    }

    fn complete(&mut self, table: &str, row: &Row) -> MigrateResult<Row> {
        if let Some(unknown) = row.keys().find(|k| !self.columns.iter().any(|c| &c.name == *k)) {
            return Err(MigrationError::database(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                unknown, table
            )));
        }

        let mut stored = Row::new();
        for column in &self.columns {
            let value = match row.get(&column.name) {
                Some(value) => value.clone(),
                None if column.serial => {
                    self.sequence += 1;
                    Value::from(self.sequence)
                }
                None => column.default.clone().unwrap_or(Value::Null),
            };
            stored.insert(column.name.clone(), value);
        }
        Ok(stored)
    }

    fn check(&self, table: &str, row: &Row, skip: Option<usize>) -> MigrateResult<()> {
        for column in &self.columns {
            let is_null = row.get(&column.name).is_none_or(Value::is_null);
            if is_null && !column.allow_null {
                return Err(MigrationError::database(format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column.name, table
                )));
            }
        }

        let primary: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        let mut keys: Vec<(&str, &Vec<String>)> = self
            .uniques
            .iter()
            .map(|u| (u.name.as_str(), &u.columns))
            .collect();
        let pkey_name = format!("{}_pkey", table);
        if !primary.is_empty() {
            keys.push((pkey_name.as_str(), &primary));
        }

        for (name, columns) in keys {
            let values: Vec<&Value> = columns
                .iter()
                .map(|c| row.get(c).unwrap_or(&Value::Null))
                .collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = self.rows.iter().enumerate().any(|(i, other)| {
                Some(i) != skip
                    && columns.iter().zip(&values).all(|(c, v)| {
                        other.get(c).is_some_and(|o| values_equal(o, v))
                    })
            });
            if clash {
                return Err(MigrationError::database(format!(
                    "duplicate key value violates unique constraint \"{}\"",
                    name
                )));
            }
        }
        Ok(())
    }

    fn matching(&self, filter: &Row) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                filter
                    .iter()
                    .all(|(c, v)| row.get(c).is_some_and(|o| values_equal(o, v)))
            })
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: IndexMap<String, MemTable>,
}

impl State {
    fn table(&self, name: &str) -> MigrateResult<&MemTable> {
        self.tables.get(name).ok_or_else(|| missing(name))
    }

    fn table_mut(&mut self, name: &str) -> MigrateResult<&mut MemTable> {
        self.tables.get_mut(name).ok_or_else(|| missing(name))
    }

    fn create(&mut self, descriptor: &TableDescriptor) -> MigrateResult<()> {
        let name = &descriptor.table_name;
        if self.tables.contains_key(name) {
            return Err(MigrationError::database(format!(
                "relation \"{}\" already exists",
                name
            )));
        }
        self.tables
            .insert(name.clone(), MemTable::from_descriptor(descriptor));
        Ok(())
    }

    fn insert(&mut self, table: &str, row: &Row) -> MigrateResult<Row> {
        let target = self.table_mut(table)?;
        let stored = target.complete(table, row)?;
        target.check(table, &stored, None)?;
        target.rows.push(stored.clone());
        Ok(stored)
    }

    fn update(&mut self, table: &str, filter: &Row, changes: &Row) -> MigrateResult<u64> {
        let target = self.table_mut(table)?;
        if let Some(unknown) = changes
            .keys()
            .find(|k| !target.columns.iter().any(|c| &c.name == *k))
        {
            return Err(MigrationError::database(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                unknown, table
            )));
        }

        let indexes = target.matching(filter);
        for &i in &indexes {
            let mut updated = target.rows[i].clone();
            for (column, value) in changes {
                updated.insert(column.clone(), value.clone());
            }
            target.check(table, &updated, Some(i))?;
            target.rows[i] = updated;
        }
        Ok(indexes.len() as u64)
    }

    fn delete(&mut self, table: &str, filter: &Row) -> MigrateResult<u64> {
        let target = self.table_mut(table)?;
        let before = target.rows.len();
        let keep: Vec<Row> = target
            .rows
            .iter()
            .filter(|row| {
                !filter
                    .iter()
                    .all(|(c, v)| row.get(c).is_some_and(|o| values_equal(o, v)))
            })
            .cloned()
            .collect();
        target.rows = keep;
        Ok((before - target.rows.len()) as u64)
    }
}

fn missing(table: &str) -> MigrationError {
    MigrationError::database(format!("relation \"{}\" does not exist", table))
}

fn single(column: &str, value: &Value) -> Row {
    let mut filter = Row::new();
    filter.insert(column.to_string(), value.clone());
    filter
}

/// A session operation that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    /// Describing the named table.
    Describe(String),
    /// Listing the uniqueness constraints of the named table.
    UniqueConstraints(String),
    /// Dropping a constraint of the named table.
    DropConstraint(String),
}

impl fmt::Display for FailPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Describe(table) => write!(f, "describe {}", table),
            Self::UniqueConstraints(table) => write!(f, "list constraints of {}", table),
            Self::DropConstraint(table) => write!(f, "drop constraint on {}", table),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    journal: Mutex<Vec<String>>,
    failures: Mutex<Vec<FailPoint>>,
}

impl Shared {
    fn take_failure(&self, point: &FailPoint) -> bool {
        let mut failures = self.failures.lock();
        match failures.iter().position(|f| f == point) {
            Some(i) => {
                failures.remove(i);
                true
            }
            None => false,
        }
    }
}

/// An in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction on a snapshot of the committed state.
    pub fn begin(&self) -> MemorySession {
        MemorySession {
            shared: Arc::clone(&self.shared),
            state: Mutex::new(self.shared.state.lock().clone()),
            savepoints: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
        }
    }

    /// Make the next matching session operation fail once.
    pub fn fail_next(&self, point: FailPoint) {
        self.shared.failures.lock().push(point);
    }

    /// Committed table names.
    pub fn table_names(&self) -> Vec<String> {
        self.shared.state.lock().tables.keys().cloned().collect()
    }

    /// Whether a committed table exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.shared.state.lock().tables.contains_key(table)
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.shared
            .state
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Committed column descriptions of a table.
    pub fn columns(&self, table: &str) -> Option<Vec<LiveColumn>> {
        self.shared.state.lock().tables.get(table).map(describe)
    }

    /// Committed uniqueness constraints of a table.
    pub fn constraints(&self, table: &str) -> Vec<UniqueConstraint> {
        self.shared
            .state
            .lock()
            .tables
            .get(table)
            .map(|t| t.uniques.clone())
            .unwrap_or_default()
    }

    /// Current value of a table's sequence.
    pub fn sequence(&self, table: &str) -> Option<i64> {
        let state = self.shared.state.lock();
        let target = state.tables.get(table)?;
        target.serial_column().map(|_| target.sequence)
    }

    /// Structural statements executed so far, committed or not.
    pub fn journal(&self) -> Vec<String> {
        self.shared.journal.lock().clone()
    }

    /// Forget the statement journal.
    pub fn clear_journal(&self) {
        self.shared.journal.lock().clear();
    }

    /// Create a table with explicit column descriptions, outside any
    /// transaction. Columns get no defaults and no sequence.
    pub fn create_raw_table(&self, table: &str, columns: &[LiveColumn]) {
        let columns = columns
            .iter()
            .map(|c| MemColumn {
                name: c.name.clone(),
                reported_type: c.reported_type.clone(),
                allow_null: c.allow_null,
                primary_key: c.primary_key,
                default: None,
                serial: false,
            })
            .collect();
        self.shared.state.lock().tables.insert(
            table.to_string(),
            MemTable {
                columns,
                ..Default::default()
            },
        );
    }

    /// Add a uniqueness constraint outside any transaction.
    pub fn add_unique_constraint(
        &self,
        table: &str,
        constraint: UniqueConstraint,
    ) -> MigrateResult<()> {
        let mut state = self.shared.state.lock();
        state.table_mut(table)?.uniques.push(constraint);
        Ok(())
    }

    /// Insert a row outside any transaction.
    pub fn insert_raw(&self, table: &str, row: Row) -> MigrateResult<Row> {
        self.shared.state.lock().insert(table, &row)
    }

    /// Update rows outside any transaction.
    pub fn update_raw(
        &self,
        table: &str,
        column: &str,
        value: &Value,
        changes: Row,
    ) -> MigrateResult<u64> {
        self.shared
            .state
            .lock()
            .update(table, &single(column, value), &changes)
    }

    /// Delete rows outside any transaction.
    pub fn delete_raw(&self, table: &str, column: &str, value: &Value) -> MigrateResult<u64> {
        self.shared.state.lock().delete(table, &single(column, value))
    }
}

fn describe(table: &MemTable) -> Vec<LiveColumn> {
    table
        .columns
        .iter()
        .map(|c| LiveColumn::new(&c.name, &c.reported_type, c.allow_null, c.primary_key))
        .collect()
}

/// A transaction on a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    state: Mutex<State>,
    savepoints: Mutex<Vec<(String, State)>>,
    aborted: AtomicBool,
}

impl MemorySession {
    fn log(&self, statement: String) {
        debug!(sql = %statement, "memory statement");
        self.shared.journal.lock().push(statement);
    }

    /// Whether a failed statement left the session unusable.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn injected(&self, point: FailPoint) -> MigrateResult<()> {
        if self.shared.take_failure(&point) {
            return Err(MigrationError::database(format!("injected failure: {}", point)));
        }
        Ok(())
    }

    /// Run one statement. Refused while aborted; a failure aborts.
    fn statement<T>(&self, run: impl FnOnce() -> MigrateResult<T>) -> MigrateResult<T> {
        if self.is_aborted() {
            return Err(MigrationError::transaction(
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }
        let result = run();
        if result.is_err() {
            self.aborted.store(true, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait::async_trait]
impl SchemaSession for MemorySession {
    async fn describe_table(&self, table: &str) -> MigrateResult<Option<Vec<LiveColumn>>> {
        self.statement(|| {
            self.injected(FailPoint::Describe(table.to_string()))?;
            Ok(self.state.lock().tables.get(table).map(describe))
        })
    }

    async fn create_table(&self, descriptor: &TableDescriptor) -> MigrateResult<()> {
        self.statement(|| {
            self.state.lock().create(descriptor)?;
            self.log(format!("CREATE TABLE {}", descriptor.table_name));
            Ok(())
        })
    }

    async fn copy_table(&self, source: &str, target: &str) -> MigrateResult<()> {
        self.statement(|| {
            let mut state = self.state.lock();
            if state.tables.contains_key(target) {
                return Err(MigrationError::database(format!(
                    "relation \"{}\" already exists",
                    target
                )));
            }
            let original = state.table(source)?;
            let copy = MemTable {
                columns: original
                    .columns
                    .iter()
                    .map(|c| MemColumn {
                        allow_null: true,
                        primary_key: false,
                        default: None,
                        serial: false,
                        ..c.clone()
                    })
                    .collect(),
                rows: original.rows.clone(),
                uniques: Vec::new(),
                sequence: 0,
            };
            state.tables.insert(target.to_string(), copy);
            drop(state);
            self.log(format!("CREATE TABLE {} AS SELECT * FROM {}", target, source));
            Ok(())
        })
    }

    async fn drop_table(&self, table: &str) -> MigrateResult<()> {
        self.statement(|| {
            if self.state.lock().tables.shift_remove(table).is_some() {
                self.log(format!("DROP TABLE {}", table));
            }
            Ok(())
        })
    }

    async fn select_all(&self, table: &str) -> MigrateResult<Vec<Row>> {
        self.statement(|| Ok(self.state.lock().table(table)?.rows.clone()))
    }

    async fn select_where(&self, table: &str, filter: &Row) -> MigrateResult<Vec<Row>> {
        self.statement(|| {
            let state = self.state.lock();
            let target = state.table(table)?;
            Ok(target
                .matching(filter)
                .into_iter()
                .map(|i| target.rows[i].clone())
                .collect())
        })
    }

    async fn insert_row(&self, descriptor: &TableDescriptor, row: &Row) -> MigrateResult<Row> {
        self.statement(|| self.state.lock().insert(&descriptor.table_name, row))
    }

    async fn update_row(
        &self,
        descriptor: &TableDescriptor,
        key_column: &str,
        key: &Value,
        changes: &Row,
    ) -> MigrateResult<u64> {
        self.statement(|| {
            self.state
                .lock()
                .update(&descriptor.table_name, &single(key_column, key), changes)
        })
    }

    async fn delete_row(&self, table: &str, column: &str, value: &Value) -> MigrateResult<u64> {
        self.statement(|| self.state.lock().delete(table, &single(column, value)))
    }

    async fn unique_constraints(&self, table: &str) -> MigrateResult<Vec<UniqueConstraint>> {
        self.statement(|| {
            self.injected(FailPoint::UniqueConstraints(table.to_string()))?;
            Ok(self.state.lock().table(table)?.uniques.clone())
        })
    }

    async fn drop_constraint(&self, table: &str, name: &str) -> MigrateResult<()> {
        self.statement(|| {
            self.injected(FailPoint::DropConstraint(table.to_string()))?;
            let mut state = self.state.lock();
            let target = state.table_mut(table)?;
            let before = target.uniques.len();
            target.uniques.retain(|u| u.name != name);
            if target.uniques.len() == before {
                return Err(MigrationError::database(format!(
                    "constraint \"{}\" of relation \"{}\" does not exist",
                    name, table
                )));
            }
            drop(state);
            self.log(format!("ALTER TABLE {} DROP CONSTRAINT {}", table, name));
            Ok(())
        })
    }

    async fn reset_sequence(&self, table: &str, column: &str) -> MigrateResult<Option<i64>> {
        self.statement(|| {
            let mut state = self.state.lock();
            let target = state.table_mut(table)?;
            if target.serial_column() != Some(column) {
                return Ok(None);
            }
            let max = target
                .rows
                .iter()
                .filter_map(|row| row.get(column).and_then(Value::as_i64))
                .max()
                .unwrap_or(1);
            target.sequence = max.max(1);
            Ok(Some(target.sequence))
        })
    }

    async fn savepoint(&self, name: &str) -> MigrateResult<()> {
        self.statement(|| {
            let snapshot = self.state.lock().clone();
            self.savepoints.lock().push((name.to_string(), snapshot));
            Ok(())
        })
    }

    async fn rollback_to_savepoint(&self, name: &str) -> MigrateResult<()> {
        let mut savepoints = self.savepoints.lock();
        let position = savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| {
                MigrationError::transaction(format!("savepoint \"{}\" does not exist", name))
            })?;
        savepoints.truncate(position + 1);
        *self.state.lock() = savepoints[position].1.clone();
        self.aborted.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> MigrateResult<()> {
        self.statement(|| {
            let mut savepoints = self.savepoints.lock();
            let position = savepoints
                .iter()
                .rposition(|(n, _)| n == name)
                .ok_or_else(|| {
                    MigrationError::transaction(format!("savepoint \"{}\" does not exist", name))
                })?;
            savepoints.truncate(position);
            Ok(())
        })
    }
}

#[async_trait::async_trait]
impl TransactionalSession for MemorySession {
    async fn commit(self) -> MigrateResult<()> {
        if self.is_aborted() {
            return Err(MigrationError::transaction(
                "cannot commit an aborted transaction",
            ));
        }
        *self.shared.state.lock() = self.state.into_inner();
        Ok(())
    }

    async fn rollback(self) -> MigrateResult<()> {
        Ok(())
    }
}
