//! End-to-end scenarios exercised against a real `sqlite::memory:`
//! connection through the public `Engine` surface.

use std::sync::Arc;
use std::time::Duration;

use fileset::NoopFileRepository;
use schema::{CompareOp, Column, Expr, LogicalType, Predicate, Query, Row, Schema, Table, Value};

fn users_schema() -> Schema {
    Schema::new().table(
        Table::new("users")
            .column(Column::new("name", LogicalType::Text).not_null().default_value(""))
            .column(Column::new("age", LogicalType::Integer).not_null().default_value(0))
            .column(Column::new("email", LogicalType::Text).lww()),
    )
}

async fn open() -> Arc<engine::Engine> {
    engine::Engine::open(
        ":memory:",
        users_schema(),
        Arc::new(NoopFileRepository::default()),
        engine::EngineConfig::default(),
    )
    .await
    .unwrap()
}

// Scenario 1: insert-then-read via record.
#[tokio::test]
async fn insert_then_read_via_record() {
    let db = open().await;

    let mut record = db.new_record("users").unwrap();
    record.set_text("name", "Alice").unwrap();
    record.set_integer("age", 30).unwrap();
    record.set_text("email", "a@x").unwrap();
    record.save().await.unwrap();

    assert!(!record.is_new());
    let system_id = record.system_id().expect("system_id populated after save");

    let rows = db.query_table("users").await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get("name"), Some(&Value::Text("Alice".to_string())));
    assert_eq!(row.get("age"), Some(&Value::Integer(30)));
    assert_eq!(row.get("email"), Some(&Value::Text("a@x".to_string())));
    assert_eq!(row.get(schema::SYSTEM_ID), Some(&Value::Text(system_id)));
    assert!(matches!(row.get(schema::SYSTEM_CREATED_AT), Some(Value::Text(_))));
    assert!(matches!(row.get(schema::SYSTEM_VERSION), Some(Value::Text(_))));
    assert!(matches!(row.get("email__hlc"), Some(Value::Text(_))));
}

// Scenario 2: LWW staleness rejection.
#[tokio::test]
async fn lww_staleness_is_rejected() {
    let db = open().await;

    let inserted = db
        .insert(
            "users",
            Row::new()
                .with("name", Value::Text("Bob".into()))
                .with("age", Value::Integer(1))
                .with("email", Value::Text("v1".into())),
        )
        .await
        .unwrap();
    let system_id = match inserted.get(schema::SYSTEM_ID) {
        Some(Value::Text(s)) => s.clone(),
        _ => panic!("missing system_id"),
    };
    let h1 = match inserted.get("email__hlc") {
        Some(Value::Text(s)) => s.clone(),
        _ => panic!("missing email__hlc"),
    };

    // A server update stamped with an HLC strictly less than h1 must not
    // overwrite the locally-won value.
    let stale_hlc: hlc::Hlc = h1.parse().unwrap();
    let even_staler = hlc::Hlc {
        timestamp: stale_hlc.timestamp.saturating_sub(1),
        version: 0,
        node_id: stale_hlc.node_id,
    };

    db.apply_server_update(
        "users",
        &system_id,
        Row::new()
            .with("email", Value::Text("v0".into()))
            .with("email__hlc", Value::Text(even_staler.to_string())),
        even_staler,
    )
    .await
    .unwrap();

    let row = db.get_record("users", &system_id).await.unwrap();
    assert_eq!(row.get_text("email").unwrap(), Some("v1".to_string()));
    assert_eq!(row.get_text("email__hlc").unwrap(), Some(h1));
}

// Scenario 3: dirty-row data on update carries only the changed columns.
#[tokio::test]
async fn dirty_row_data_on_update_is_changed_columns_only() {
    let db = open().await;

    let inserted = db
        .insert(
            "users",
            Row::new().with("name", Value::Text("Carol".into())).with("age", Value::Integer(20)),
        )
        .await
        .unwrap();
    let system_id = match inserted.get(schema::SYSTEM_ID) {
        Some(Value::Text(s)) => s.clone(),
        _ => panic!("missing system_id"),
    };

    db.update_by_id("users", &system_id, Row::new().with("age", Value::Integer(31))).await.unwrap();

    let row = db.get_record("users", &system_id).await.unwrap();
    assert_eq!(row.get_integer("age").unwrap(), Some(31));
    assert_eq!(row.get_text("name").unwrap(), Some("Carol".to_string()));

    let dirty_rows = db.get_dirty_rows().await.unwrap();
    let entry = dirty_rows.iter().find(|r| r.row_id == system_id).unwrap();
    match &entry.data {
        dirty::DirtyRowData::Update(data) => {
            assert_eq!(data, &serde_json::json!({"age": 31}));
        }
        other => panic!("expected an Update dirty-row entry, got {other:?}"),
    }
    assert_eq!(entry.hlc.to_string(), row.get_text(schema::SYSTEM_VERSION).unwrap().unwrap());
}

// update()/delete() match every row the predicate selects, not just one.
#[tokio::test]
async fn where_based_update_and_delete_affect_every_matching_row() {
    let db = open().await;
    for n in 0..4 {
        db.insert(
            "users",
            Row::new().with("name", Value::Text(format!("user-{n}"))).with("age", Value::Integer(if n < 3 { 18 } else { 40 })),
        )
        .await
        .unwrap();
    }

    let minors = Predicate::Compare { left: Expr::col("age"), op: CompareOp::Lt, right: Expr::Literal(Value::Integer(30)) };
    let affected = db.update("users", Row::new().with("age", Value::Integer(19)), &minors).await.unwrap();
    assert_eq!(affected, 3);

    let rows = db.query_table("users").await.unwrap();
    let ages: Vec<_> = rows.iter().map(|r| r.get("age").cloned()).collect();
    assert_eq!(ages.iter().filter(|a| **a == Some(Value::Integer(19))).count(), 3);
    assert_eq!(ages.iter().filter(|a| **a == Some(Value::Integer(40))).count(), 1);

    let still_minors = Predicate::Compare { left: Expr::col("age"), op: CompareOp::Lt, right: Expr::Literal(Value::Integer(30)) };
    let deleted = db.delete("users", &still_minors).await.unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(db.query_table("users").await.unwrap().len(), 1);
}

// Scenario 4: a stream over `users` does not refresh on an unrelated table's
// write.
#[tokio::test]
async fn stream_ignores_unrelated_table_changes() {
    let schema = Schema::new()
        .table(Table::new("users").column(Column::new("name", LogicalType::Text).not_null().default_value("")))
        .table(Table::new("orders").column(Column::new("total", LogicalType::Integer).not_null().default_value(0)));
    let db = engine::Engine::open(
        ":memory:",
        schema,
        Arc::new(NoopFileRepository::default()),
        engine::EngineConfig::default(),
    )
    .await
    .unwrap();

    let stream = db.stream(Query::from("users"), |row| row);
    let mut sub = stream.subscribe().await;
    assert_eq!(sub.latest().len(), 0); // onListen already triggered the initial refresh

    db.insert("orders", Row::new().with("total", Value::Integer(5))).await.unwrap();

    let changed = tokio::time::timeout(Duration::from_millis(200), sub.changed()).await;
    assert!(changed.is_err(), "stream over users must not refresh on an orders write");
}

// Scenario 5: three rapid inserts within the 50ms buffer window collapse
// into one refreshed emission containing all three rows.
#[tokio::test]
async fn rapid_inserts_batch_into_one_refresh() {
    let db = open().await;

    let stream = db.stream(Query::from("users"), |row| row);
    let sub = stream.subscribe().await;
    assert_eq!(sub.latest().len(), 0); // onListen already triggered the initial refresh

    for n in 0..3 {
        db.insert(
            "users",
            Row::new().with("name", Value::Text(format!("user-{n}"))).with("age", Value::Integer(n)),
        )
        .await
        .unwrap();
    }

    // Give the manager's 50ms buffering window time to coalesce the three
    // table-change notifications into one refresh before inspecting the
    // final emitted list.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(sub.latest().len(), 3);
}

// Empty result set emits `[]` on first subscription.
#[tokio::test]
async fn empty_query_emits_empty_list_on_first_subscription() {
    let db = open().await;
    let stream = db.stream(Query::from("users"), |row| row);
    let sub = stream.subscribe().await;
    assert_eq!(sub.latest().len(), 0);
}

// applyServerUpdate never creates a dirty row.
#[tokio::test]
async fn apply_server_update_creates_no_dirty_row() {
    let db = open().await;
    let inserted = db
        .insert("users", Row::new().with("name", Value::Text("Dana".into())).with("age", Value::Integer(9)))
        .await
        .unwrap();
    let system_id = match inserted.get(schema::SYSTEM_ID) {
        Some(Value::Text(s)) => s.clone(),
        _ => panic!("missing system_id"),
    };

    let pending_before = db.pending_dirty_row_count().await.unwrap();
    let server_hlc = hlc::HlcClock::global().now();
    db.apply_server_update("users", &system_id, Row::new().with("name", Value::Text("Dana2".into())), server_hlc)
        .await
        .unwrap();
    let pending_after = db.pending_dirty_row_count().await.unwrap();
    assert_eq!(pending_before, pending_after);

    // Non-LWW columns are written unconditionally: the transport is the
    // authority for them, regardless of HLC ordering against system_version.
    let row = db.get_record("users", &system_id).await.unwrap();
    assert_eq!(row.get_text("name").unwrap(), Some("Dana2".to_string()));
}

// bulkLoad bypasses the dirty-row log but still notifies streams.
#[tokio::test]
async fn bulk_load_skips_dirty_rows_but_notifies_streams() {
    let db = open().await;
    let stream = db.stream(Query::from("users"), |row| row);
    let mut sub = stream.subscribe().await;
    assert_eq!(sub.latest().len(), 0); // onListen already triggered the initial refresh

    db.bulk_load(
        "users",
        vec![
            Row::new().with("name", Value::Text("Eve".into())).with("age", Value::Integer(40)),
            Row::new().with("name", Value::Text("Frank".into())).with("age", Value::Integer(41)),
        ],
    )
    .await
    .unwrap();

    sub.changed().await.unwrap();
    assert_eq!(sub.latest().len(), 2);
    assert_eq!(db.pending_dirty_row_count().await.unwrap(), 0);
}

// query_typed / query_table_records wire DbRecord through the typed-record
// factory registry end to end.
#[tokio::test]
async fn query_table_records_returns_saveable_records() {
    let db = open().await;
    db.insert("users", Row::new().with("name", Value::Text("Gia".into())).with("age", Value::Integer(22)))
        .await
        .unwrap();

    let mut records = db.query_table_records("users").await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &mut records[0];
    assert!(!record.is_new());
    record.set_integer("age", 23).unwrap();
    record.save().await.unwrap();

    let reloaded = db.query_table("users").await.unwrap();
    assert_eq!(reloaded[0].get("age"), Some(&Value::Integer(23)));
}

// Engine refuses to hand out a caller-driven transaction.
#[tokio::test]
async fn transactions_are_unsupported() {
    let db = open().await;
    let result = db.transaction();
    assert!(matches!(result, Err(engine::EngineError::UnsupportedOperation(_))));
}
