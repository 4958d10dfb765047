//! The normal row-creation path.
//!
//! Rows written by copy-back and by the seed reconciler go through here so
//! that declared defaults and managed timestamps are filled in the same way
//! an application insert would fill them. Payload keys that are not columns
//! of the table are dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::descriptor::{CREATED_AT, TableDescriptor, UPDATED_AT};
use crate::error::{MigrateResult, MigrationError};
use crate::session::{Row, SchemaSession};

/// Current time in the form timestamps are stored.
pub fn now_timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Build the row to insert for `payload`.
pub fn prepare_insert(descriptor: &TableDescriptor, payload: &Row) -> Row {
    let mut row = Row::new();
    for (name, spec) in &descriptor.fields {
        match payload.get(name) {
            Some(value) => {
                row.insert(name.clone(), value.clone());
            }
            None => {
                if let Some(default) = &spec.default_value {
                    row.insert(name.clone(), default.clone());
                }
            }
        }
    }

    if descriptor.options.timestamps {
        let now = now_timestamp();
        for column in [CREATED_AT, UPDATED_AT] {
            let value = payload
                .get(column)
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| now.clone());
            row.insert(column.to_string(), value);
        }
    }

    row
}

/// Build the change set that brings `current` in line with `payload`.
///
/// Only declared, non-key fields whose values differ are included. Returns
/// `None` when nothing differs.
pub fn prepare_update(descriptor: &TableDescriptor, current: &Row, payload: &Row) -> Option<Row> {
    let mut changes = Row::new();
    for (name, spec) in &descriptor.fields {
        if spec.primary_key {
            continue;
        }
        let Some(wanted) = payload.get(name) else {
            continue;
        };
        let stored = current.get(name).unwrap_or(&Value::Null);
        if !values_equal(stored, wanted) {
            changes.insert(name.clone(), wanted.clone());
        }
    }

    if changes.is_empty() {
        return None;
    }
    if descriptor.options.timestamps {
        changes.insert(UPDATED_AT.to_string(), now_timestamp());
    }
    Some(changes)
}

/// Compare a stored value with a declared one.
///
/// Numbers compare by value regardless of integer/float representation, and
/// RFC 3339 timestamps compare by instant.
pub fn values_equal(stored: &Value, wanted: &Value) -> bool {
    match (stored, wanted) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        // Decimal columns come back as strings.
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        (Value::String(a), Value::String(b)) if a != b => {
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            }
        }
        _ => stored == wanted,
    }
}

/// Read a row's primary key as a record id.
pub fn record_id(descriptor: &TableDescriptor, row: &Row) -> MigrateResult<i64> {
    let key = seeded_key(descriptor)?;
    row.get(key).and_then(Value::as_i64).ok_or_else(|| {
        MigrationError::database(format!(
            "row in '{}' has no integer '{}'",
            descriptor.table_name, key
        ))
    })
}

/// The key column used to address rows governed by seeds.
pub fn seeded_key(descriptor: &TableDescriptor) -> MigrateResult<&str> {
    descriptor.single_primary_key().ok_or_else(|| {
        MigrationError::descriptor(format!(
            "table '{}' needs a single-column primary key to hold seed records",
            descriptor.table_name
        ))
    })
}

/// Insert a row through the normal creation path.
pub async fn create<S: SchemaSession + ?Sized>(
    session: &S,
    descriptor: &TableDescriptor,
    payload: &Row,
) -> MigrateResult<Row> {
    let row = prepare_insert(descriptor, payload);
    session.insert_row(descriptor, &row).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldSpec;
    use crate::types::ColumnType;
    use serde_json::json;

    fn systems() -> TableDescriptor {
        TableDescriptor::new("Systems", "systems")
            .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
            .field("name", FieldSpec::new(ColumnType::String).not_null().unique())
            .field("isActive", FieldSpec::new(ColumnType::Boolean).not_null().default_value(true))
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Row::new(),
        }
    }

    #[test]
    fn test_prepare_insert_fills_defaults_and_timestamps() {
        let prepared = prepare_insert(
            &systems(),
            &row(json!({ "name": "mySpace", "_level": "forms" })),
        );
        assert_eq!(prepared["name"], json!("mySpace"));
        assert_eq!(prepared["isActive"], json!(true));
        assert!(prepared[CREATED_AT].is_string());
        assert!(prepared[UPDATED_AT].is_string());
        assert!(!prepared.contains_key("_level"));
        assert!(!prepared.contains_key("id"));
    }

    #[test]
    fn test_prepare_insert_keeps_existing_timestamps() {
        let created = json!("2020-01-01T00:00:00.000Z");
        let prepared = prepare_insert(
            &systems(),
            &row(json!({ "id": 3, "name": "x", "createdAt": created.clone() })),
        );
        assert_eq!(prepared[CREATED_AT], created);
        assert_eq!(prepared["id"], json!(3));
    }

    #[test]
    fn test_prepare_update_only_differing_non_key_fields() {
        let current = row(json!({ "id": 1, "name": "old", "isActive": true }));
        let changes = prepare_update(
            &systems(),
            &current,
            &row(json!({ "id": 99, "name": "new", "isActive": true })),
        )
        .unwrap();
        assert_eq!(changes["name"], json!("new"));
        assert!(!changes.contains_key("id"));
        assert!(!changes.contains_key("isActive"));
        assert!(changes.contains_key(UPDATED_AT));

        let same = row(json!({ "id": 1, "name": "old" }));
        assert!(prepare_update(&systems(), &current, &same).is_none());
    }

    #[test]
    fn test_values_equal() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!("2.50"), &json!(2.5)));
        assert!(values_equal(&json!({ "a": [1, 2] }), &json!({ "a": [1, 2] })));
        assert!(!values_equal(&json!(null), &json!("x")));
        assert!(!values_equal(&json!("1"), &json!(true)));
        assert!(values_equal(
            &json!("2024-01-01T10:00:00+00:00"),
            &json!("2024-01-01T10:00:00.000Z")
        ));
        assert!(!values_equal(&json!("admin"), &json!("public")));
    }

    #[test]
    fn test_record_id_requires_single_key() {
        assert_eq!(record_id(&systems(), &row(json!({ "id": 7 }))).unwrap(), 7);
        let composite = TableDescriptor::new("T", "t")
            .field("a", FieldSpec::new(ColumnType::Integer).primary_key())
            .field("b", FieldSpec::new(ColumnType::Integer).primary_key());
        assert!(record_id(&composite, &row(json!({ "a": 1, "b": 2 }))).is_err());
    }
}
