//! Diffs a declarative [`schema::Schema`] against an introspected
//! [`LiveDatabase`], producing the list of changes needed to reconcile them.

use schema::{Column, Key, KeyKind, LogicalType, Table, View};

use crate::introspect::{LiveDatabase, LiveIndex, LiveTable};

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    CreateTable(Table),
    DropTable(String),
    /// Additive, nullable-or-defaulted column on an existing table — no
    /// recreation needed.
    AddColumn { table: String, column: Column },
    /// Forces a table recreation.
    DropColumn { table: String, column: String },
    /// Forces a table recreation: e.g. a column gained a NOT NULL constraint
    /// or changed logical type.
    AlterColumnConstraint { table: String, column: String },
    AddKey { table: String, key: Key },
    DropKey { table: String, key_name: String },
    CreateView(View),
    DropView(String),
    AlterView(View),
}

/// A table recreation is needed whenever any of its changes forces one;
/// additive changes (new table, plain AddColumn, indexed/unique-key add/drop)
/// never do — SQLite has no `ALTER TABLE ADD CONSTRAINT PRIMARY KEY`, but a
/// unique key is just a `CREATE UNIQUE INDEX`.
fn forces_recreation(change: &Change) -> bool {
    matches!(
        change,
        Change::DropColumn { .. } | Change::AlterColumnConstraint { .. }
    ) || matches!(change, Change::AddKey { key, .. } if key.kind == KeyKind::Primary)
        || matches!(change, Change::DropKey { .. })
}

pub fn affects_table(change: &Change, table: &str) -> bool {
    match change {
        Change::CreateTable(t) => t.name == table,
        Change::DropTable(t) => t == table,
        Change::AddColumn { table: t, .. }
        | Change::DropColumn { table: t, .. }
        | Change::AlterColumnConstraint { table: t, .. }
        | Change::AddKey { table: t, .. }
        | Change::DropKey { table: t, .. } => t == table,
        Change::CreateView(_) | Change::DropView(_) | Change::AlterView(_) => false,
    }
}

/// True iff any change in `changes` targeting `table` forces a recreation.
pub fn table_needs_recreation(changes: &[Change], table: &str) -> bool {
    changes
        .iter()
        .any(|c| affects_table(c, table) && forces_recreation(c))
}

fn decl_type_for(ty: LogicalType) -> &'static str {
    match ty {
        LogicalType::Text | LogicalType::Guid | LogicalType::Date | LogicalType::Fileset => "TEXT",
        LogicalType::Integer => "INTEGER",
        LogicalType::Real => "REAL",
        LogicalType::Blob => "BLOB",
    }
}

fn column_matches_live(column: &Column, live: &LiveTable) -> Option<&'static str> {
    let live_col = live.columns.iter().find(|c| c.name == column.name)?;
    let want_type = decl_type_for(column.ty);
    if !live_col.decl_type.eq_ignore_ascii_case(want_type) {
        return Some("type");
    }
    if column.not_null && !live_col.not_null {
        return Some("not_null");
    }
    None
}

fn user_created_indices(live: &LiveTable) -> impl Iterator<Item = &LiveIndex> {
    // `origin = 'c'` means the index came from an explicit CREATE INDEX;
    // `'u'`/`'pk'` are SQLite-synthesized backing indices for UNIQUE/PRIMARY
    // KEY table constraints and are diffed implicitly via AddKey/DropKey on
    // primary/unique keys, not as standalone indexed keys.
    live.indices.iter().filter(|i| i.origin == "c")
}

/// Diffs `schema` against `live`, returning the ordered change list plus a
/// per-table flag (consulted by the caller building the execution plan) for
/// whether each touched table needs full recreation.
pub fn diff(schema: &schema::Schema, live: &LiveDatabase) -> Vec<Change> {
    let mut changes = Vec::new();

    for table in &schema.tables {
        match live.find_table(&table.name) {
            None => changes.push(Change::CreateTable(table.clone())),
            Some(live_table) => {
                diff_table(table, live_table, &mut changes);
            }
        }
    }

    for live_table in &live.tables {
        if schema.find_table(&live_table.name).is_none() {
            changes.push(Change::DropTable(live_table.name.clone()));
        }
    }

    for view in &schema.views {
        match live.find_view(&view.name) {
            None => changes.push(Change::CreateView(view.clone())),
            Some(live_view) => {
                // SQLite stores the exact CREATE VIEW text it was given, so
                // lowering the declared view to the same statement form and
                // comparing it textually catches both RawSql and IR-defined
                // views, and keeps a second run a true no-op.
                let declared_sql = crate::ddl::create_view_sql(view);
                if declared_sql.trim() != live_view.sql.trim() {
                    changes.push(Change::AlterView(view.clone()));
                }
            }
        }
    }

    for live_view in &live.views {
        if schema.find_view(&live_view.name).is_none() {
            changes.push(Change::DropView(live_view.name.clone()));
        }
    }

    changes
}

fn diff_table(table: &Table, live_table: &LiveTable, changes: &mut Vec<Change>) {
    let effective = table.effective_columns();

    for column in &effective {
        match live_table.columns.iter().find(|c| c.name == column.name) {
            None => {
                // New column: additive only if nullable or defaulted; a
                // NOT NULL column with neither is a SchemaValidation error
                // caught before diffing is reached.
                changes.push(Change::AddColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                });
            }
            Some(_) => {
                if column_matches_live(column, live_table).is_some() {
                    changes.push(Change::AlterColumnConstraint {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
        }
    }

    for live_col in &live_table.columns {
        if !effective.iter().any(|c| c.name == live_col.name) {
            changes.push(Change::DropColumn {
                table: table.name.clone(),
                column: live_col.name.clone(),
            });
        }
    }

    diff_keys(table, live_table, changes);
}

fn diff_keys(table: &Table, live_table: &LiveTable, changes: &mut Vec<Change>) {
    let effective_keys = table.effective_keys();

    for key in &effective_keys {
        match key.kind {
            KeyKind::Indexed => {
                let present = user_created_indices(live_table)
                    .any(|i| i.columns == key.columns && !i.unique);
                if !present {
                    changes.push(Change::AddKey {
                        table: table.name.clone(),
                        key: key.clone(),
                    });
                }
            }
            KeyKind::Primary | KeyKind::Unique => {
                // Primary/unique shape changes are detected by checking
                // whether a live index backing that column set with matching
                // uniqueness already exists; SQLite surfaces the PK via
                // `table_info.pk` rather than `index_list` for rowid tables
                // without a composite key, so a single-column integer PK is
                // treated as already satisfied by `CreateTable`/`AddColumn`
                // and not re-diffed here.
                if key.columns.len() > 1 || key.kind == KeyKind::Unique {
                    let present = live_table
                        .indices
                        .iter()
                        .any(|i| i.columns == key.columns && i.unique);
                    if !present {
                        changes.push(Change::AddKey {
                            table: table.name.clone(),
                            key: key.clone(),
                        });
                    }
                }
            }
        }
    }

    for live_index in user_created_indices(live_table) {
        let still_declared = effective_keys
            .iter()
            .any(|k| k.kind == KeyKind::Indexed && k.columns == live_index.columns);
        if !still_declared {
            changes.push(Change::DropKey {
                table: table.name.clone(),
                key_name: live_index.name.clone(),
            });
        }
    }
}
