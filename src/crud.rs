//! The mutating CRUD surface: `insert`, `update`, `delete`, `bulkLoad`,
//! `applyServerUpdate`, plus the `raw*` escape hatches.
//!
//! Every path that originates locally (not `bulkLoad`/`applyServerUpdate`)
//! writes its `__dirty_rows` entry in the same transaction as the primary
//! mutation and only calls `notify_table_changed` for the user's own table,
//! never for `__dirty_rows` itself — that hidden table has no streaming
//! queries over it to refresh.

use base64::Engine as _;
use hlc::Hlc;
use sea_orm::{ConnectionTrait, Statement, TransactionTrait};
use schema::{Row, Table, Value};
use uuid::Uuid;

use crate::error::EngineError;
use crate::Engine;

/// Mirrors `schema::builder`'s own `literal_to_sea`: this crate builds
/// dynamic-table-name DML that `sea_query`'s typed entity API has no surface
/// for, so the same explicit `Value` match is repeated here rather than
/// threading a conversion through `schema`.
fn value_to_sea(value: &Value) -> sea_query::SimpleExpr {
    let sv = match value {
        Value::Null => sea_query::Value::String(None),
        Value::Text(s) => sea_query::Value::String(Some(Box::new(s.clone()))),
        Value::Integer(i) => sea_query::Value::BigInt(Some(*i)),
        Value::Real(f) => sea_query::Value::Double(Some(*f)),
        Value::Blob(b) => sea_query::Value::Bytes(Some(Box::new(b.clone()))),
    };
    sea_query::Expr::val(sv).into()
}

async fn exec_insert<C: ConnectionTrait>(conn: &C, table: &str, row: &Row) -> Result<(), sea_orm::DbErr> {
    let mut stmt = sea_query::Query::insert();
    stmt.into_table(sea_query::Alias::new(table));
    let columns: Vec<sea_query::Alias> = row.column_names().map(sea_query::Alias::new).collect();
    stmt.columns(columns);
    let values: Vec<sea_query::SimpleExpr> = row.iter().map(|(_, v)| value_to_sea(v)).collect();
    stmt.values_panic(values);
    let sql = stmt.to_string(sea_query::SqliteQueryBuilder);
    conn.execute(Statement::from_string(conn.get_database_backend(), sql)).await?;
    Ok(())
}

async fn exec_update<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    system_id: &str,
    changes: &Row,
) -> Result<u64, sea_orm::DbErr> {
    let mut stmt = sea_query::Query::update();
    stmt.table(sea_query::Alias::new(table));
    let values: Vec<(sea_query::Alias, sea_query::SimpleExpr)> = changes
        .iter()
        .map(|(name, v)| (sea_query::Alias::new(name.as_str()), value_to_sea(v)))
        .collect();
    stmt.values(values);
    stmt.and_where(sea_query::Expr::col(sea_query::Alias::new(schema::SYSTEM_ID)).eq(system_id));
    let sql = stmt.to_string(sea_query::SqliteQueryBuilder);
    let result = conn.execute(Statement::from_string(conn.get_database_backend(), sql)).await?;
    Ok(result.rows_affected())
}

async fn exec_delete<C: ConnectionTrait>(conn: &C, table: &str, system_id: &str) -> Result<u64, sea_orm::DbErr> {
    let mut stmt = sea_query::Query::delete();
    stmt.from_table(sea_query::Alias::new(table));
    stmt.and_where(sea_query::Expr::col(sea_query::Alias::new(schema::SYSTEM_ID)).eq(system_id));
    let sql = stmt.to_string(sea_query::SqliteQueryBuilder);
    let result = conn.execute(Statement::from_string(conn.get_database_backend(), sql)).await?;
    Ok(result.rows_affected())
}

pub(crate) async fn fetch_row_via<C: ConnectionTrait>(
    conn: &C,
    table_def: &Table,
    system_id: &str,
) -> Result<Option<Row>, EngineError> {
    let columns = table_def.effective_columns();
    let mut stmt = sea_query::Query::select();
    stmt.from(sea_query::Alias::new(table_def.name.as_str()));
    for column in &columns {
        stmt.column(sea_query::Alias::new(column.name.as_str()));
    }
    stmt.cond_where(schema::predicate_to_sea(&system_id_predicate(system_id)));
    let sql = stmt.to_string(sea_query::SqliteQueryBuilder);
    let result = conn.query_one(Statement::from_string(conn.get_database_backend(), sql)).await?;
    let typed_columns: Vec<_> = columns.iter().map(|c| (c.name.clone(), c.ty)).collect();
    Ok(result.map(|qr| crate::query::row_from_result_typed(&qr, &typed_columns)))
}

fn system_id_predicate(system_id: &str) -> schema::Predicate {
    schema::Predicate::Compare {
        left: schema::Expr::col(schema::SYSTEM_ID),
        op: schema::CompareOp::Eq,
        right: schema::Expr::Literal(Value::Text(system_id.to_string())),
    }
}

async fn fetch_rows_matching<C: ConnectionTrait>(
    conn: &C,
    table_def: &Table,
    predicate: &schema::Predicate,
) -> Result<Vec<Row>, EngineError> {
    let columns = table_def.effective_columns();
    let mut stmt = sea_query::Query::select();
    stmt.from(sea_query::Alias::new(table_def.name.as_str()));
    for column in &columns {
        stmt.column(sea_query::Alias::new(column.name.as_str()));
    }
    stmt.cond_where(schema::predicate_to_sea(predicate));
    let sql = stmt.to_string(sea_query::SqliteQueryBuilder);
    let result = conn.query_all(Statement::from_string(conn.get_database_backend(), sql)).await?;
    let typed_columns: Vec<_> = columns.iter().map(|c| (c.name.clone(), c.ty)).collect();
    Ok(result.iter().map(|qr| crate::query::row_from_result_typed(qr, &typed_columns)).collect())
}

fn parse_hlc(row: &Row, column: &str) -> Option<Hlc> {
    match row.get(column) {
        Some(Value::Text(s)) => s.parse::<Hlc>().ok(),
        _ => None,
    }
}

fn observe_row_hlcs(table_def: &Table, row: &Row) {
    if let Some(hlc) = parse_hlc(row, schema::SYSTEM_VERSION) {
        hlc::HlcClock::global().observe(hlc);
    }
    for column in table_def.lww_columns() {
        if let Some(hlc) = parse_hlc(row, &column.hlc_companion_name()) {
            hlc::HlcClock::global().observe(hlc);
        }
    }
}

/// Fills in `system_id`/`system_created_at`/`system_version`, user-column
/// defaults, and a fresh HLC for every LWW companion missing from `values`.
/// Returns the resolved `system_id`.
fn fill_system_columns_and_defaults(table_def: &Table, values: &mut Row, hlc: Hlc) -> Result<String, EngineError> {
    let system_id = match values.get(schema::SYSTEM_ID) {
        Some(Value::Text(s)) => s.clone(),
        _ => Uuid::new_v4().to_string(),
    };
    values.insert(schema::SYSTEM_ID, Value::Text(system_id.clone()));
    if !values.contains(schema::SYSTEM_CREATED_AT) {
        values.insert(schema::SYSTEM_CREATED_AT, Value::Text(hlc.to_string()));
    }
    values.insert(schema::SYSTEM_VERSION, Value::Text(hlc.to_string()));

    for column in &table_def.columns {
        if !values.contains(&column.name) {
            if let Some(default) = column.default.resolve() {
                values.insert(column.name.clone(), default);
            } else if column.not_null {
                return Err(EngineError::ConstraintViolation(format!(
                    "missing required column {} on table {}",
                    column.name, table_def.name
                )));
            }
        }
        if column.lww && !values.contains(&column.hlc_companion_name()) {
            values.insert(column.hlc_companion_name(), Value::Text(hlc.to_string()));
        }
    }
    Ok(system_id)
}

impl Engine {
    pub(crate) fn table(&self, name: &str) -> Result<&Table, EngineError> {
        self.schema
            .find_table(name)
            .ok_or_else(|| EngineError::Internal(format!("unknown table {name}")))
    }

    pub(crate) async fn fetch_row(&self, table: &str, system_id: &str) -> Result<Option<Row>, EngineError> {
        let table_def = self.table(table)?;
        fetch_row_via(&self.conn, table_def, system_id).await
    }

    /// Inserts a new row, stamping system columns, column defaults, and LWW
    /// HLC companions, and records a `__dirty_rows` entry for export.
    pub async fn insert(&self, table: &str, mut values: Row) -> Result<Row, EngineError> {
        let table_def = self.table(table)?.clone();
        let hlc = hlc::HlcClock::global().now();
        let system_id = fill_system_columns_and_defaults(&table_def, &mut values, hlc)?;

        let txn = self.conn.begin().await?;
        exec_insert(&txn, table, &values).await?;
        dirty::DirtyRowStore::record(
            &txn,
            &dirty::DirtyRow {
                table_name: table.to_string(),
                row_id: system_id,
                hlc,
                data: dirty::DirtyRowData::Insert(row_to_json(&values)),
            },
        )
        .await?;
        txn.commit().await?;

        self.stream_manager.notify_table_changed(table.to_string()).await;
        Ok(values)
    }

    /// `update(table, values, where) -> rows_affected`: for
    /// every row `predicate` matches, writes the subset of `values` that
    /// actually differs from what's stored; a non-LWW column differing is
    /// written unconditionally, an LWW column is additionally gated by
    /// whether `now()` dominates the stored `*__hlc` companion (stale writes
    /// are silently dropped, column by column, same merge `apply_server_update`
    /// uses). Stamps a fresh `system_version` and appends one `__dirty_rows`
    /// entry per row actually written — a row matched by `predicate` whose
    /// columns all turned out unchanged (or whose only differing column was
    /// stale LWW data) does not count toward the returned total. The
    /// dirty-row `data` carries only the user-changed columns, never
    /// `system_version` or a `*__hlc` companion.
    pub async fn update(&self, table: &str, values: Row, predicate: &schema::Predicate) -> Result<u64, EngineError> {
        let table_def = self.table(table)?.clone();
        let hlc = hlc::HlcClock::global().now();

        let txn = self.conn.begin().await?;
        let matched = fetch_rows_matching(&txn, &table_def, predicate).await?;

        let mut affected = 0u64;
        for existing in matched {
            let system_id = match existing.get(schema::SYSTEM_ID) {
                Some(Value::Text(s)) => s.clone(),
                _ => continue,
            };

            let mut changes = Row::new();
            let mut exported = Row::new();
            for (name, value) in values.iter() {
                let name = name.as_str();
                if name == schema::SYSTEM_ID || name == schema::SYSTEM_CREATED_AT || name == schema::SYSTEM_VERSION {
                    continue;
                }
                if existing.get(name) == Some(value) {
                    continue;
                }
                if let Some(column) = table_def.columns.iter().find(|c| c.name == name) {
                    if column.lww {
                        let hlc_column = column.hlc_companion_name();
                        let incoming_wins = match parse_hlc(&existing, &hlc_column) {
                            Some(existing_hlc) => hlc >= existing_hlc,
                            None => true,
                        };
                        if !incoming_wins {
                            continue;
                        }
                        changes.insert(hlc_column, Value::Text(hlc.to_string()));
                    }
                }
                changes.insert(name.to_string(), value.clone());
                exported.insert(name.to_string(), value.clone());
            }

            if changes.is_empty() {
                continue;
            }
            changes.insert(schema::SYSTEM_VERSION, Value::Text(hlc.to_string()));

            exec_update(&txn, table, &system_id, &changes).await?;
            dirty::DirtyRowStore::record(
                &txn,
                &dirty::DirtyRow {
                    table_name: table.to_string(),
                    row_id: system_id,
                    hlc,
                    data: dirty::DirtyRowData::Update(row_to_json(&exported)),
                },
            )
            .await?;
            affected += 1;
        }
        txn.commit().await?;

        if affected > 0 {
            self.stream_manager.notify_table_changed(table.to_string()).await;
        }
        Ok(affected)
    }

    /// Convenience wrapper over [`Engine::update`] for the common case of
    /// targeting exactly one row by `system_id` — what `DbRecord::save()`
    /// does under the hood (`update(table, dirty_subset, where: system_id =
    /// ?)`). Fails with `ConcurrencyConflict` if the row no longer exists.
    pub async fn update_by_id(&self, table: &str, system_id: &str, changes: Row) -> Result<(), EngineError> {
        let affected = self.update(table, changes, &system_id_predicate(system_id)).await?;
        if affected == 0 {
            return Err(EngineError::ConcurrencyConflict {
                table: table.to_string(),
                system_id: system_id.to_string(),
            });
        }
        Ok(())
    }

    /// `delete(table, where) -> rows_affected`: deletes
    /// every row `predicate` matches and appends a `__dirty_rows` entry with
    /// `data = null` for each.
    pub async fn delete(&self, table: &str, predicate: &schema::Predicate) -> Result<u64, EngineError> {
        let table_def = self.table(table)?.clone();
        let hlc = hlc::HlcClock::global().now();

        let txn = self.conn.begin().await?;
        let matched = fetch_rows_matching(&txn, &table_def, predicate).await?;

        let mut affected = 0u64;
        for existing in matched {
            let system_id = match existing.get(schema::SYSTEM_ID) {
                Some(Value::Text(s)) => s.clone(),
                _ => continue,
            };
            exec_delete(&txn, table, &system_id).await?;
            dirty::DirtyRowStore::record(
                &txn,
                &dirty::DirtyRow {
                    table_name: table.to_string(),
                    row_id: system_id,
                    hlc,
                    data: dirty::DirtyRowData::Delete,
                },
            )
            .await?;
            affected += 1;
        }
        txn.commit().await?;

        if affected > 0 {
            self.stream_manager.notify_table_changed(table.to_string()).await;
        }
        Ok(affected)
    }

    /// Convenience wrapper over [`Engine::delete`] for the common case of
    /// targeting exactly one row by `system_id`. Fails with `NotFound` if
    /// the row was already gone.
    pub async fn delete_by_id(&self, table: &str, system_id: &str) -> Result<(), EngineError> {
        let affected = self.delete(table, &system_id_predicate(system_id)).await?;
        if affected == 0 {
            return Err(EngineError::NotFound {
                table: table.to_string(),
                system_id: system_id.to_string(),
            });
        }
        Ok(())
    }

    /// Inserts many rows in one transaction without touching `__dirty_rows` —
    /// for loading data this engine already owns (e.g. restoring a local
    /// snapshot), not for mutations that need to propagate outbound.
    pub async fn bulk_load(&self, table: &str, rows: Vec<Row>) -> Result<(), EngineError> {
        let table_def = self.table(table)?.clone();

        let txn = self.conn.begin().await?;
        for mut values in rows {
            let hlc = hlc::HlcClock::global().now();
            fill_system_columns_and_defaults(&table_def, &mut values, hlc)?;
            exec_insert(&txn, table, &values).await?;
        }
        txn.commit().await?;

        self.stream_manager.notify_table_changed(table.to_string()).await;
        Ok(())
    }

    /// Applies a row received from a remote peer at `hlc`, the write's own
    /// HLC — the inverse of outbound sync. Per column in `incoming`: LWW
    /// columns merge under LWW rules
    /// (the incoming value wins iff its HLC — its own `*__hlc` companion if
    /// present in `incoming`, else `hlc` — is at least the stored
    /// `*__hlc`); non-LWW columns are written unconditionally, since the
    /// transport is the authority for them. Never writes a `__dirty_rows`
    /// entry — an incoming server update is not itself a pending outbound
    /// mutation. Folds `hlc` (and every LWW companion HLC present in
    /// `incoming`) into the local clock so subsequent local writes sort
    /// after it.
    pub async fn apply_server_update(&self, table: &str, system_id: &str, incoming: Row, hlc: Hlc) -> Result<(), EngineError> {
        let table_def = self.table(table)?.clone();

        let txn = self.conn.begin().await?;
        let existing = fetch_row_via(&txn, &table_def, system_id).await?;

        let Some(existing) = existing else {
            let mut values = incoming.clone();
            if !values.contains(schema::SYSTEM_VERSION) {
                values.insert(schema::SYSTEM_VERSION, Value::Text(hlc.to_string()));
            }
            if !values.contains(schema::SYSTEM_CREATED_AT) {
                values.insert(schema::SYSTEM_CREATED_AT, Value::Text(hlc.to_string()));
            }
            exec_insert(&txn, table, &values).await?;
            txn.commit().await?;
            hlc::HlcClock::global().observe(hlc);
            observe_row_hlcs(&table_def, &values);
            self.stream_manager.notify_table_changed(table.to_string()).await;
            return Ok(());
        };

        let mut changes = Row::new();

        for column in &table_def.columns {
            if column.lww {
                continue;
            }
            if let Some(value) = incoming.get(&column.name) {
                changes.insert(column.name.clone(), value.clone());
            }
        }

        for column in table_def.lww_columns() {
            if incoming.get(&column.name).is_none() {
                continue;
            }
            let hlc_column = column.hlc_companion_name();
            let incoming_hlc = parse_hlc(&incoming, &hlc_column).unwrap_or(hlc);
            let incoming_wins = match parse_hlc(&existing, &hlc_column) {
                Some(existing_hlc) => incoming_hlc >= existing_hlc,
                None => true,
            };
            if incoming_wins {
                changes.insert(column.name.clone(), incoming.get(&column.name).unwrap().clone());
                changes.insert(hlc_column, Value::Text(incoming_hlc.to_string()));
            }
        }

        if changes.is_empty() {
            txn.commit().await?;
            return Ok(());
        }

        let existing_version = parse_hlc(&existing, schema::SYSTEM_VERSION);
        if existing_version.map(|v| hlc >= v).unwrap_or(true) {
            changes.insert(schema::SYSTEM_VERSION, Value::Text(hlc.to_string()));
        }

        exec_update(&txn, table, system_id, &changes).await?;
        txn.commit().await?;

        hlc::HlcClock::global().observe(hlc);
        observe_row_hlcs(&table_def, &changes);
        self.stream_manager.notify_table_changed(table.to_string()).await;
        Ok(())
    }

    /// `getDirtyRows()`: every
    /// pending outbound mutation, HLC-ascending, for the surrounding sync
    /// layer to ship to the remote server.
    pub async fn get_dirty_rows(&self) -> Result<Vec<dirty::DirtyRow>, EngineError> {
        Ok(dirty::DirtyRowStore::dirty_rows(&self.conn).await?)
    }

    /// `removeDirtyRow(table, row_id, hlc)`: idempotent
    /// acknowledgement from the sync layer. Removes the entry only if its
    /// HLC still matches — a stale ack superseded by a newer local write is
    /// a no-op, not an error.
    pub async fn remove_dirty_row(&self, table: &str, row_id: &str, hlc: Hlc) -> Result<(), EngineError> {
        Ok(dirty::DirtyRowStore::remove(&self.conn, table, row_id, hlc).await?)
    }

    /// The number of rows currently pending outbound export. Exposed mainly
    /// for callers (and tests) that want to observe `bulkLoad`/
    /// `applyServerUpdate` leaving `__dirty_rows` untouched without pulling
    /// the full list.
    pub async fn pending_dirty_row_count(&self) -> Result<usize, EngineError> {
        Ok(self.get_dirty_rows().await?.len())
    }

    /// Direct SQL escape hatches for statements the `Query` IR cannot express
    ///. These bypass system-column stamping, LWW merge, and
    /// `__dirty_rows` bookkeeping entirely — the caller owns those concerns.
    pub async fn raw_insert(&self, sql: &str) -> Result<(), EngineError> {
        self.conn
            .execute(Statement::from_string(self.conn.get_database_backend(), sql.to_string()))
            .await?;
        Ok(())
    }

    pub async fn raw_update(&self, sql: &str) -> Result<u64, EngineError> {
        let result = self
            .conn
            .execute(Statement::from_string(self.conn.get_database_backend(), sql.to_string()))
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn raw_delete(&self, sql: &str) -> Result<u64, EngineError> {
        self.raw_update(sql).await
    }

    /// Explicit notification hook for `raw_insert`/`raw_update`/`raw_delete`
    /// callers: the engine cannot identify which tables a raw SQL string
    /// touches, so a caller that issues one must post the affected table
    /// names itself or streams over them will miss the change.
    pub async fn notify_tables_changed(&self, tables: impl IntoIterator<Item = String>) {
        self.stream_manager.notify_multiple_tables_changed(tables).await;
    }
}

pub(crate) fn row_to_json(row: &Row) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in row.iter() {
        map.insert(name.clone(), value_to_json(value));
    }
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Integer(i) => serde_json::Value::Number((*i).into()),
        Value::Real(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::Blob(b) => serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}
