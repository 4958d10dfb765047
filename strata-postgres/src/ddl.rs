//! SQL generation for PostgreSQL.
//!
//! Tables are created from descriptors with their primary key, uniqueness
//! constraints, foreign keys and defaults inline. Declared unique indexes
//! become named `UNIQUE` constraints so constraint sync can see them; plain
//! indexes become `CREATE INDEX` statements.

use serde_json::Value;
use strata_migrate::{FieldSpec, TableDescriptor};

use crate::error::{PgError, PgResult};

const ON_DELETE_ACTIONS: [&str; 5] = [
    "CASCADE",
    "SET NULL",
    "SET DEFAULT",
    "RESTRICT",
    "NO ACTION",
];

/// Quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a JSON value as a SQL literal for a `DEFAULT` clause.
pub fn default_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        other => format!("{}::json", quote_literal(&other.to_string())),
    }
}

/// Generate a column definition.
pub fn column_definition(table: &str, name: &str, spec: &FieldSpec) -> PgResult<String> {
    let serial = spec.primary_key && spec.auto_increment;
    let mut parts = vec![quote_ident(name), spec.ty.postgres_type(serial).to_string()];

    if !spec.allows_null() && !spec.primary_key {
        parts.push("NOT NULL".to_string());
    }

    if spec.unique && !spec.primary_key {
        parts.push("UNIQUE".to_string());
    }

    if let Some(default) = spec.default_value.as_ref().filter(|_| !serial) {
        parts.push(format!("DEFAULT {}", default_literal(default)));
    }

    if let Some(fk) = &spec.references {
        parts.push(format!(
            "REFERENCES {} ({})",
            quote_ident(&fk.model),
            quote_ident(&fk.key)
        ));
        if let Some(action) = &fk.on_delete {
            let action = action.trim().to_uppercase();
            if !ON_DELETE_ACTIONS.contains(&action.as_str()) {
                return Err(PgError::query(format!(
                    "invalid onDelete action '{}' on {}.{}",
                    action, table, name
                )));
            }
            parts.push(format!("ON DELETE {}", action));
        }
    }

    Ok(parts.join(" "))
}

/// Generate the statements creating a table and its indexes.
pub fn create_table(descriptor: &TableDescriptor) -> PgResult<Vec<String>> {
    let table = descriptor.table_name.as_str();
    let mut columns = Vec::new();

    for (name, spec) in descriptor.desired_fields() {
        columns.push(column_definition(table, &name, &spec)?);
    }

    let pk: Vec<String> = descriptor
        .primary_key_fields()
        .into_iter()
        .map(quote_ident)
        .collect();
    if !pk.is_empty() {
        columns.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    let mut statements = Vec::new();
    for index in &descriptor.options.indexes {
        let cols: Vec<String> = index.fields.iter().map(|c| quote_ident(c)).collect();
        let name = quote_ident(&index.name_for(table));
        if index.unique {
            columns.push(format!("CONSTRAINT {} UNIQUE ({})", name, cols.join(", ")));
        } else {
            statements.push(format!(
                "CREATE INDEX {} ON {} ({});",
                name,
                quote_ident(table),
                cols.join(", ")
            ));
        }
    }

    statements.insert(
        0,
        format!(
            "CREATE TABLE {} (\n    {}\n);",
            quote_ident(table),
            columns.join(",\n    ")
        ),
    );
    Ok(statements)
}

/// Generate a statement copying a table's structure and rows.
pub fn copy_table(source: &str, target: &str) -> String {
    format!(
        "CREATE TABLE {} AS SELECT * FROM {};",
        quote_ident(target),
        quote_ident(source)
    )
}

/// Generate a DROP TABLE statement.
pub fn drop_table(name: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE;", quote_ident(name))
}

/// Generate a DROP CONSTRAINT statement.
pub fn drop_constraint(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {};",
        quote_ident(table),
        quote_ident(name)
    )
}

/// Generate a statement reading every row of a table as JSON text.
pub fn select_all(table: &str) -> String {
    format!("SELECT row_to_json(t)::text FROM {} AS t", quote_ident(table))
}

/// Generate a statement reading rows matching a JSON filter (`$1`) on the
/// given columns.
pub fn select_where(table: &str, columns: &[&str]) -> String {
    let mut sql = format!(
        "SELECT row_to_json(t)::text FROM {table} AS t, json_populate_record(NULL::{table}, $1::json) AS f",
        table = quote_ident(table)
    );
    push_match(&mut sql, "t", "f", columns);
    sql
}

/// Generate an INSERT of the given columns from a JSON row (`$1`),
/// returning the stored row as JSON text.
pub fn insert_row(table: &str, columns: &[&str]) -> String {
    let target = quote_ident(table);
    if columns.is_empty() {
        return format!("INSERT INTO {} AS t DEFAULT VALUES RETURNING row_to_json(t)::text", target);
    }
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {target} AS t ({cols}) SELECT {cols} FROM json_populate_record(NULL::{target}, $1::json) RETURNING row_to_json(t)::text",
        target = target,
        cols = cols.join(", ")
    )
}

/// Generate an UPDATE setting `columns` from a JSON row (`$1`) on rows whose
/// `key_column` equals the one in a JSON key row (`$2`).
pub fn update_row(table: &str, key_column: &str, columns: &[&str]) -> String {
    let target = quote_ident(table);
    let sets: Vec<String> = columns
        .iter()
        .map(|c| format!("{col} = s.{col}", col = quote_ident(c)))
        .collect();
    let mut sql = format!(
        "UPDATE {target} AS t SET {sets} FROM json_populate_record(NULL::{target}, $1::json) AS s, json_populate_record(NULL::{target}, $2::json) AS k",
        target = target,
        sets = sets.join(", ")
    );
    push_match(&mut sql, "t", "k", &[key_column]);
    sql
}

/// Generate a DELETE of rows matching a JSON filter (`$1`) on one column.
pub fn delete_row(table: &str, column: &str) -> String {
    let mut sql = format!(
        "DELETE FROM {table} AS t USING json_populate_record(NULL::{table}, $1::json) AS f",
        table = quote_ident(table)
    );
    push_match(&mut sql, "t", "f", &[column]);
    sql
}

/// Generate a statement resetting the sequence behind `column` to
/// `max(MAX(column), 1)`. Yields NULL when the column has no sequence.
pub fn reset_sequence(table: &str, column: &str) -> String {
    format!(
        "SELECT setval(pg_get_serial_sequence({}, {})::regclass, COALESCE(MAX({}), 1))::bigint FROM {}",
        quote_literal(&quote_ident(table)),
        quote_literal(column),
        quote_ident(column),
        quote_ident(table)
    )
}

fn push_match(sql: &mut String, left: &str, right: &str, columns: &[&str]) {
    if columns.is_empty() {
        return;
    }
    let conditions: Vec<String> = columns
        .iter()
        .map(|c| format!("{left}.{col} = {right}.{col}", col = quote_ident(c)))
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));
}
