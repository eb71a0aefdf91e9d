//! Lowers a [`Change`] list into executable DDL, using the same
//! `sea_query::Table`/`ColumnDef`/`Index` builders, generated
//! programmatically from the diff rather than written by hand per
//! migration file.

use sea_query::{Alias, ColumnDef, Index, SqliteQueryBuilder, Table as SeaTable};

use schema::{Column, Key, KeyKind, LogicalType, Table, View, ViewDefinition};

use crate::diff::{table_needs_recreation, Change};
use crate::introspect::LiveTable;

fn col_alias(name: &str) -> Alias {
    Alias::new(name)
}

fn apply_column_type(def: &mut ColumnDef, ty: LogicalType) {
    match ty {
        LogicalType::Text | LogicalType::Guid | LogicalType::Date | LogicalType::Fileset => {
            def.text();
        }
        LogicalType::Integer => {
            def.big_integer();
        }
        LogicalType::Real => {
            def.double();
        }
        LogicalType::Blob => {
            def.blob();
        }
    }
}

fn column_def(column: &Column) -> ColumnDef {
    let mut def = ColumnDef::new(col_alias(&column.name));
    apply_column_type(&mut def, column.ty);
    if column.not_null {
        def.not_null();
    }
    if let Some(default) = column.default.resolve() {
        def.default(sea_query::Value::from(default));
    }
    def
}

fn create_table_statement(table: &Table) -> sea_query::TableCreateStatement {
    let mut stmt = SeaTable::create();
    stmt.table(col_alias(&table.name)).if_not_exists();
    for column in table.effective_columns() {
        stmt.col(column_def(&column));
    }
    let keys = table.effective_keys();
    let primary: Vec<_> = keys.iter().filter(|k| k.kind == KeyKind::Primary).collect();
    if let Some(pk) = primary.first() {
        let mut idx = Index::create().primary();
        for c in &pk.columns {
            idx.col(col_alias(c));
        }
        stmt.primary_key(&mut idx);
    }
    for key in keys.iter().filter(|k| k.kind == KeyKind::Unique) {
        let mut idx = Index::create();
        idx.name(key_ddl_name(&table.name, key)).unique();
        for c in &key.columns {
            idx.col(col_alias(c));
        }
        stmt.index(&mut idx);
    }
    stmt
}

pub fn create_table_sql(table: &Table) -> String {
    create_table_statement(table).to_string(SqliteQueryBuilder)
}

pub fn drop_table_sql(name: &str) -> String {
    SeaTable::drop()
        .table(col_alias(name))
        .if_exists()
        .to_string(SqliteQueryBuilder)
}

pub fn rename_table_sql(from: &str, to: &str) -> String {
    SeaTable::rename()
        .table(col_alias(from), col_alias(to))
        .to_string(SqliteQueryBuilder)
}

pub fn add_column_sql(table: &str, column: &Column) -> String {
    SeaTable::alter()
        .table(col_alias(table))
        .add_column(column_def(column))
        .to_string(SqliteQueryBuilder)
}

fn key_ddl_name(table: &str, key: &Key) -> String {
    key.name(table)
}

pub fn create_index_sql(table: &str, key: &Key) -> String {
    let mut idx = Index::create();
    idx.name(key_ddl_name(table, key))
        .table(col_alias(table))
        .if_not_exists();
    for c in &key.columns {
        idx.col(col_alias(c));
    }
    if key.kind != KeyKind::Indexed {
        idx.unique();
    }
    idx.to_string(SqliteQueryBuilder)
}

pub fn drop_index_sql(name: &str) -> String {
    Index::drop()
        .name(name)
        .if_exists()
        .to_string(SqliteQueryBuilder)
}

pub fn create_view_sql(view: &View) -> String {
    let select_sql = match &view.definition {
        ViewDefinition::Query(query) => schema::to_sql_string(query),
        ViewDefinition::RawSql(sql) => sql.clone(),
    };
    format!("CREATE VIEW \"{}\" AS {}", view.name, select_sql)
}

pub fn drop_view_sql(name: &str) -> String {
    format!("DROP VIEW IF EXISTS \"{name}\"")
}

/// The rename-recreate-copy-drop sequence for a table forced to recreate
///. Newly NOT-NULL columns with a default wrap the
/// source column reference in `IFNULL(old.c, <default>)` in the copy step.
pub fn recreate_table_sql(table: &Table, live: &LiveTable) -> Vec<String> {
    let old_name = format!("old_{}", table.name);
    let mut statements = vec![rename_table_sql(&table.name, &old_name)];

    statements.push(create_table_statement(table).to_string(SqliteQueryBuilder));

    let effective = table.effective_columns();
    let live_names: Vec<&str> = live.columns.iter().map(|c| c.name.as_str()).collect();

    let target_cols: Vec<&str> = effective
        .iter()
        .filter(|c| live_names.contains(&c.name.as_str()))
        .map(|c| c.name.as_str())
        .collect();

    let source_exprs: Vec<String> = effective
        .iter()
        .filter(|c| live_names.contains(&c.name.as_str()))
        .map(|c| {
            let is_newly_not_null = c.not_null
                && live
                    .columns
                    .iter()
                    .find(|lc| lc.name == c.name)
                    .map(|lc| !lc.not_null)
                    .unwrap_or(false);
            if is_newly_not_null {
                if let Some(default) = c.default.resolve() {
                    let literal = literal_sql(&default);
                    return format!("IFNULL(\"{}\", {})", c.name, literal);
                }
            }
            format!("\"{}\"", c.name)
        })
        .collect();

    if !target_cols.is_empty() {
        let insert = format!(
            "INSERT INTO \"{}\" ({}) SELECT {} FROM \"{}\"",
            table.name,
            target_cols
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", "),
            source_exprs.join(", "),
            old_name,
        );
        statements.push(insert);
    }

    statements.push(drop_table_sql(&old_name));
    statements
}

fn literal_sql(value: &schema::Value) -> String {
    match value {
        schema::Value::Null => "NULL".to_string(),
        schema::Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        schema::Value::Integer(i) => i.to_string(),
        schema::Value::Real(f) => f.to_string(),
        schema::Value::Blob(_) => "NULL".to_string(),
    }
}

/// Expands a raw [`Change`] list into the literal SQL statements to execute,
/// grouping every change that targets a recreating table into that table's
/// single recreation sequence instead of emitting them individually.
pub fn plan_statements(
    changes: &[Change],
    schema_tables: &[Table],
    live: &crate::introspect::LiveDatabase,
) -> Vec<String> {
    let mut statements = Vec::new();
    let mut recreated = std::collections::HashSet::new();

    for change in changes {
        let table_name = match change {
            Change::AddColumn { table, .. }
            | Change::DropColumn { table, .. }
            | Change::AlterColumnConstraint { table, .. }
            | Change::AddKey { table, .. }
            | Change::DropKey { table, .. } => Some(table.as_str()),
            _ => None,
        };
        if let Some(name) = table_name {
            if table_needs_recreation(changes, name) && recreated.insert(name.to_string()) {
                if let (Some(table), Some(live_table)) = (
                    schema_tables.iter().find(|t| t.name == name),
                    live.find_table(name),
                ) {
                    statements.extend(recreate_table_sql(table, live_table));
                }
            }
        }
    }

    for change in changes {
        match change {
            Change::CreateTable(table) => statements.push(create_table_sql(table)),
            Change::DropTable(name) => statements.push(drop_table_sql(name)),
            Change::AddColumn { table, column } => {
                if !recreated.contains(table) {
                    statements.push(add_column_sql(table, column));
                }
            }
            Change::AddKey { table, key } if key.kind != KeyKind::Primary => {
                statements.push(create_index_sql(table, key));
            }
            Change::DropKey { key_name, .. } => {
                statements.push(drop_index_sql(key_name));
            }
            Change::CreateView(view) => statements.push(create_view_sql(view)),
            Change::DropView(name) => statements.push(drop_view_sql(name)),
            Change::AlterView(view) => {
                statements.push(drop_view_sql(&view.name));
                statements.push(create_view_sql(view));
            }
            // DropColumn / AlterColumnConstraint / primary-key AddKey were
            // already folded into the recreation sequence above.
            _ => {}
        }
    }

    statements
}
