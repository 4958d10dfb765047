//! End-to-end tests for package runs on the in-memory backend.
//!
//! Each test drives the coordinator through committed transactions and then
//! inspects the committed state, the way a second process would see it.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use strata::migrate::{
    ColumnType, Coordinator, CopyFailurePolicy, DEFAULT_VALUES_TABLE, FieldSpec, MappingKey,
    MappingRepository, MemoryDatabase, MigrationConfig, Package, Row, RunReport, SeedSet,
    SessionMappings, TableDescriptor, TableOutcome, TransactionalSession,
};

fn roles() -> TableDescriptor {
    TableDescriptor::new("Role", "roles")
        .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
        .field("name", FieldSpec::new(ColumnType::String).not_null().unique())
        .timestamps(false)
}

fn users() -> TableDescriptor {
    TableDescriptor::new("User", "users")
        .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
        .field("email", FieldSpec::new(ColumnType::String).not_null())
        .field(
            "roleId",
            FieldSpec::new(ColumnType::Integer).references("roles", "id"),
        )
}

fn seeds(level: &str, json: &str) -> SeedSet {
    SeedSet::from_json(level, json).unwrap()
}

fn core_package(seed_json: &str) -> Package {
    Package::new("core")
        .descriptor(roles())
        .level(seeds("core", seed_json))
}

fn row(value: Value) -> Row {
    serde_json::from_value(value).unwrap()
}

async fn run(db: &MemoryDatabase, package: &Package) -> RunReport {
    Coordinator::new(MigrationConfig::default())
        .execute(package, db.begin())
        .await
        .unwrap()
}

fn names(db: &MemoryDatabase, table: &str) -> Vec<(i64, String)> {
    let mut rows: Vec<(i64, String)> = db
        .rows(table)
        .iter()
        .map(|r| {
            (
                r["id"].as_i64().unwrap(),
                r["name"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    rows.sort();
    rows
}

fn outcome<'a>(report: &'a RunReport, table: &str) -> &'a TableOutcome {
    &report
        .tables
        .iter()
        .find(|t| t.table == table)
        .unwrap()
        .outcome
}

async fn resolve(db: &MemoryDatabase, key: MappingKey) -> Option<i64> {
    let session = db.begin();
    let mappings = SessionMappings::new(&session, DEFAULT_VALUES_TABLE);
    let resolved = mappings.resolve(&key).await.unwrap();
    session.rollback().await.unwrap();
    resolved
}

const ROLES_V1: &str = r#"{ "roles": [{ "id": 1, "name": "admin" }, { "id": 2, "name": "public" }] }"#;
const ROLES_V2: &str = r#"{ "roles": [{ "id": 1, "name": "admin" }, { "id": 2, "name": "anonymous" }] }"#;
const ROLES_V3: &str = r#"{ "roles": [{ "id": 1, "name": "admin" }] }"#;

#[tokio::test]
async fn test_roles_lifecycle() {
    let db = MemoryDatabase::new();

    let first = run(&db, &core_package(ROLES_V1)).await;
    assert!(first.committed);
    assert_eq!(outcome(&first, DEFAULT_VALUES_TABLE), &TableOutcome::Created);
    assert_eq!(outcome(&first, "roles"), &TableOutcome::Created);
    assert_eq!(first.levels[0].inserted, 2);
    assert_eq!(names(&db, "roles"), vec![(1, "admin".into()), (2, "public".into())]);
    assert_eq!(db.rows(DEFAULT_VALUES_TABLE).len(), 2);
    assert_eq!(db.sequence("roles"), Some(2));

    let second = run(&db, &core_package(ROLES_V2)).await;
    assert_eq!(second.levels[0].updated, 1);
    assert_eq!(second.levels[0].unchanged, 1);
    assert_eq!(second.levels[0].mutations(), 1);
    assert_eq!(names(&db, "roles"), vec![(1, "admin".into()), (2, "anonymous".into())]);

    let third = run(&db, &core_package(ROLES_V3)).await;
    assert_eq!(third.levels[0].pruned, 1);
    assert_eq!(names(&db, "roles"), vec![(1, "admin".into())]);
    assert_eq!(db.rows(DEFAULT_VALUES_TABLE).len(), 1);
    assert_eq!(resolve(&db, MappingKey::new("core", 2, "roles")).await, None);
    assert_eq!(resolve(&db, MappingKey::new("core", 1, "roles")).await, Some(1));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let db = MemoryDatabase::new();
    let package = Package::new("core")
        .descriptors([roles(), users()])
        .level(seeds(
            "core",
            r#"{
                "roles": [{ "id": 1, "name": "admin" }],
                "users": [{ "id": 2, "email": "root@example.com", "roleId": 1 }]
            }"#,
        ));

    run(&db, &package).await;
    db.clear_journal();

    let again = run(&db, &package).await;
    assert!(!again.has_changes(), "unexpected changes: {:?}", again);
    assert!(again.tables.iter().all(|t| t.outcome == TableOutcome::Unchanged));
    assert_eq!(again.levels[0].unchanged, 2);
    assert_eq!(again.summary().split(" in ").next(), Some("core: up to date"));
    assert!(db.journal().is_empty(), "journal: {:?}", db.journal());
}

#[tokio::test]
async fn test_converges_from_empty_database() {
    let db = MemoryDatabase::new();
    let package = Package::new("core").descriptors([users(), roles()]);
    let report = run(&db, &package).await;

    let order: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
    assert_eq!(order, vec![DEFAULT_VALUES_TABLE, "roles", "users"]);

    let columns: Vec<String> = db
        .columns("users")
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .filter(|name| name != "createdAt" && name != "updatedAt")
        .collect();
    assert_eq!(columns, vec!["id", "email", "roleId"]);

    let mapping_columns: Vec<String> = db
        .columns(DEFAULT_VALUES_TABLE)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    for expected in ["level", "defaultValueId", "tableName", "recordId"] {
        assert!(mapping_columns.iter().any(|c| c == expected), "missing {}", expected);
    }
}

#[tokio::test]
async fn test_matching_table_is_never_rebuilt() {
    let db = MemoryDatabase::new();
    let package = core_package(ROLES_V1);
    run(&db, &package).await;
    db.clear_journal();

    let changed = core_package(ROLES_V2);
    run(&db, &changed).await;

    let journal = db.journal();
    assert!(journal.iter().all(|s| !s.contains("roles")), "journal: {:?}", journal);
}

#[tokio::test]
async fn test_rebuild_preserves_rows_and_identity() {
    let db = MemoryDatabase::new();
    run(&db, &core_package(ROLES_V1)).await;
    db.insert_raw("roles", row(json!({ "name": "guest" }))).unwrap();
    db.clear_journal();

    let widened = roles().field("description", FieldSpec::new(ColumnType::Text));
    let package = Package::new("core")
        .descriptor(widened)
        .level(seeds("core", ROLES_V1));
    let report = run(&db, &package).await;

    match outcome(&report, "roles") {
        TableOutcome::Rebuilt {
            differences,
            copied,
            skipped,
        } => {
            assert_eq!(differences.len(), 1);
            assert_eq!(*copied, 3);
            assert_eq!(*skipped, 0);
        }
        other => panic!("expected a rebuild, got {}", other),
    }
    assert_eq!(report.levels[0].unchanged, 2);
    assert_eq!(
        names(&db, "roles"),
        vec![(1, "admin".into()), (2, "public".into()), (3, "guest".into())]
    );
    assert!(!db.has_table("roles_temp_backup"));
    assert_eq!(db.sequence("roles"), Some(3));

    let journal = db.journal();
    assert!(journal.contains(&"CREATE TABLE roles_temp_backup AS SELECT * FROM roles".to_string()));
    assert!(journal.contains(&"DROP TABLE roles_temp_backup".to_string()));
}

#[tokio::test]
async fn test_removing_one_seed_deletes_exactly_its_row() {
    let db = MemoryDatabase::new();
    let all = r#"{ "roles": [
        { "id": 1, "name": "admin" },
        { "id": 2, "name": "public" },
        { "id": 3, "name": "support" }
    ] }"#;
    let without_two = r#"{ "roles": [
        { "id": 1, "name": "admin" },
        { "id": 3, "name": "support" }
    ] }"#;
    run(&db, &core_package(all)).await;
    db.insert_raw("roles", row(json!({ "id": 40, "name": "unmanaged" })))
        .unwrap();

    let report = run(&db, &core_package(without_two)).await;
    assert_eq!(report.levels[0].pruned, 1);
    assert_eq!(report.levels[0].unchanged, 2);
    assert_eq!(
        names(&db, "roles"),
        vec![(1, "admin".into()), (3, "support".into()), (40, "unmanaged".into())]
    );
    assert_eq!(db.rows(DEFAULT_VALUES_TABLE).len(), 2);
}

#[tokio::test]
async fn test_id_moved_to_another_table_is_not_pruned() {
    let db = MemoryDatabase::new();
    let systems = TableDescriptor::new("System", "systems")
        .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
        .field("name", FieldSpec::new(ColumnType::String))
        .timestamps(false);
    let package = |json: &str| {
        Package::new("core")
            .descriptor(roles())
            .descriptor(systems.clone())
            .level(seeds("core", json))
    };

    run(
        &db,
        &package(r#"{ "roles": [{ "id": 1, "name": "admin" }, { "id": 5, "name": "ops" }] }"#),
    )
    .await;
    let report = run(
        &db,
        &package(
            r#"{ "roles": [{ "id": 1, "name": "admin" }], "systems": [{ "id": 5, "name": "ops" }] }"#,
        ),
    )
    .await;

    assert_eq!(report.levels[0].pruned, 0);
    assert_eq!(report.levels[0].inserted, 1);
    assert_eq!(names(&db, "roles"), vec![(1, "admin".into()), (5, "ops".into())]);
    assert_eq!(names(&db, "systems"), vec![(5, "ops".into())]);
    assert_eq!(resolve(&db, MappingKey::new("core", 5, "roles")).await, Some(5));
    assert_eq!(resolve(&db, MappingKey::new("core", 5, "systems")).await, Some(5));
}

#[tokio::test]
async fn test_existing_row_with_literal_id_is_adopted() {
    let db = MemoryDatabase::new();
    run(&db, &Package::new("core").descriptor(roles())).await;
    db.insert_raw("roles", row(json!({ "id": 5, "name": "ops" })))
        .unwrap();

    let report = run(
        &db,
        &core_package(r#"{ "roles": [{ "id": 5, "name": "operators" }] }"#),
    )
    .await;

    assert_eq!(report.levels[0].adopted, 1);
    assert_eq!(report.levels[0].inserted, 0);
    assert_eq!(names(&db, "roles"), vec![(5, "operators".into())]);
    assert_eq!(resolve(&db, MappingKey::new("core", 5, "roles")).await, Some(5));
}

#[tokio::test]
async fn test_next_insert_follows_seeded_ids() {
    let db = MemoryDatabase::new();
    run(
        &db,
        &core_package(r#"{ "roles": [{ "id": 3, "name": "a" }, { "id": 10, "name": "b" }] }"#),
    )
    .await;
    assert_eq!(db.sequence("roles"), Some(10));

    let inserted = db
        .insert_raw("roles", row(json!({ "name": "c" })))
        .unwrap();
    assert_eq!(inserted["id"], json!(11));
}

#[tokio::test]
async fn test_dangling_mapping_is_repaired() {
    let db = MemoryDatabase::new();
    run(&db, &core_package(ROLES_V1)).await;
    db.delete_raw("roles", "id", &json!(2)).unwrap();

    let report = run(&db, &core_package(ROLES_V1)).await;
    assert_eq!(report.levels[0].repaired, 1);
    assert_eq!(report.levels[0].unchanged, 1);
    assert_eq!(names(&db, "roles"), vec![(1, "admin".into()), (2, "public".into())]);
    assert_eq!(resolve(&db, MappingKey::new("core", 2, "roles")).await, Some(2));
}

#[tokio::test]
async fn test_failure_rolls_back_everything() {
    let db = MemoryDatabase::new();
    // The second record violates NOT NULL on `name`.
    let package = core_package(r#"{ "roles": [{ "id": 1, "name": "admin" }, { "id": 2 }] }"#);

    let result = Coordinator::new(MigrationConfig::default())
        .execute(&package, db.begin())
        .await;
    assert!(result.is_err());
    assert!(db.table_names().is_empty());
}

#[tokio::test]
async fn test_dry_run_commits_nothing() {
    let db = MemoryDatabase::new();
    let report = Coordinator::new(MigrationConfig::default().dry_run(true))
        .execute(&core_package(ROLES_V1), db.begin())
        .await
        .unwrap();

    assert!(!report.committed);
    assert!(report.has_changes());
    assert_eq!(report.levels[0].inserted, 2);
    assert!(db.table_names().is_empty());
}

#[tokio::test]
async fn test_rebuild_without_surviving_fields_copies_nothing() {
    let db = MemoryDatabase::new();
    let note = |field: &str| {
        TableDescriptor::new("Note", "notes").field(field, FieldSpec::new(ColumnType::String))
    };
    run(&db, &Package::new("core").descriptor(note("a"))).await;
    for text in ["first", "second"] {
        db.insert_raw(
            "notes",
            row(json!({
                "a": text,
                "createdAt": "2026-01-01T00:00:00.000Z",
                "updatedAt": "2026-01-01T00:00:00.000Z"
            })),
        )
        .unwrap();
    }

    let report = run(&db, &Package::new("core").descriptor(note("b"))).await;
    match outcome(&report, "notes") {
        TableOutcome::Rebuilt {
            differences,
            copied,
            skipped,
        } => {
            assert_eq!(differences.len(), 2);
            assert_eq!((*copied, *skipped), (0, 0));
        }
        other => panic!("expected a rebuild, got {}", other),
    }
    assert!(db.rows("notes").is_empty());
    assert!(!db.has_table("notes_temp_backup"));
}

fn accounts(email: FieldSpec) -> TableDescriptor {
    TableDescriptor::new("Account", "accounts")
        .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
        .field("email", email)
        .timestamps(false)
}

async fn accounts_with_a_null_email(db: &MemoryDatabase) {
    run(
        db,
        &Package::new("core").descriptor(accounts(FieldSpec::new(ColumnType::String))),
    )
    .await;
    db.insert_raw("accounts", row(json!({ "email": "a@example.com" })))
        .unwrap();
    db.insert_raw("accounts", row(json!({ "email": null })))
        .unwrap();
    db.insert_raw("accounts", row(json!({ "email": "c@example.com" })))
        .unwrap();
}

#[tokio::test]
async fn test_copy_back_skips_rows_that_no_longer_fit() {
    let db = MemoryDatabase::new();
    accounts_with_a_null_email(&db).await;

    let strict =
        Package::new("core").descriptor(accounts(FieldSpec::new(ColumnType::String).not_null()));
    let report = run(&db, &strict).await;

    match outcome(&report, "accounts") {
        TableOutcome::Rebuilt {
            differences,
            copied,
            skipped,
        } => {
            assert_eq!(differences.len(), 1);
            assert_eq!((*copied, *skipped), (2, 1));
        }
        other => panic!("expected a rebuild, got {}", other),
    }

    let rows = db.rows("accounts");
    let emails: Vec<&str> = rows.iter().map(|r| r["email"].as_str().unwrap()).collect();
    assert_eq!(emails, vec!["a@example.com", "c@example.com"]);
    let max_id = rows.iter().map(|r| r["id"].as_i64().unwrap()).max();
    assert_eq!(db.sequence("accounts"), max_id);
}

#[tokio::test]
async fn test_copy_back_abort_policy_fails_the_run() {
    let db = MemoryDatabase::new();
    accounts_with_a_null_email(&db).await;

    let strict =
        Package::new("core").descriptor(accounts(FieldSpec::new(ColumnType::String).not_null()));
    let config = MigrationConfig::default().on_copy_failure(CopyFailurePolicy::Abort);
    let result = Coordinator::new(config)
        .execute(&strict, db.begin())
        .await;

    assert!(result.is_err());
    assert_eq!(db.rows("accounts").len(), 3);
    assert!(!db.has_table("accounts_temp_backup"));
    let email = db
        .columns("accounts")
        .unwrap()
        .into_iter()
        .find(|c| c.name == "email")
        .unwrap();
    assert!(email.allow_null);
}

#[tokio::test]
async fn test_module_seeds_upstream_tables() {
    let db = MemoryDatabase::new();
    run(&db, &core_package(ROLES_V1)).await;

    let plans = TableDescriptor::new("Plan", "plans")
        .field("id", FieldSpec::new(ColumnType::Integer).auto_key())
        .field("title", FieldSpec::new(ColumnType::String).not_null());
    let billing = Package::new("systems")
        .descriptor(plans)
        .upstream([roles()])
        .level(seeds(
            "billing",
            r#"{ "plans": [{ "id": 1, "title": "free" }], "roles": [{ "id": 20, "name": "billing" }] }"#,
        ));
    let report = run(&db, &billing).await;

    assert!(report.tables.iter().all(|t| t.table != "roles"));
    assert_eq!(report.levels[0].inserted, 2);
    assert_eq!(
        names(&db, "roles"),
        vec![(1, "admin".into()), (2, "public".into()), (20, "billing".into())]
    );
    assert!(report.sequences.contains(&("roles".to_string(), 20)));
    assert_eq!(resolve(&db, MappingKey::new("billing", 20, "roles")).await, Some(20));

    // Re-running the core level must not prune rows owned by another level.
    let again = run(&db, &core_package(ROLES_V1)).await;
    assert_eq!(again.levels[0].pruned, 0);
    assert_eq!(names(&db, "roles").len(), 3);
}

#[tokio::test]
async fn test_seeds_for_undeclared_table_are_rejected() {
    let db = MemoryDatabase::new();
    let package = Package::new("core")
        .descriptor(roles())
        .level(seeds("core", r#"{ "groups": [{ "id": 1, "name": "x" }] }"#));

    let err = Coordinator::new(MigrationConfig::default())
        .execute(&package, db.begin())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("groups"));
    assert!(db.table_names().is_empty());
}

#[tokio::test]
async fn test_reserved_mapping_table_name() {
    let db = MemoryDatabase::new();
    let clash = TableDescriptor::new("Mapping", DEFAULT_VALUES_TABLE)
        .field("id", FieldSpec::new(ColumnType::Integer).auto_key());
    let result = Coordinator::new(MigrationConfig::default())
        .execute(&Package::new("core").descriptor(clash), db.begin())
        .await;
    assert!(result.is_err());
}
