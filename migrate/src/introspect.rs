//! Live-database introspection. sea-orm's `SchemaManager` does not expose a
//! portable read path for SQLite, so this reads `sqlite_master` and the
//! `PRAGMA table_info`/`PRAGMA index_list`/`PRAGMA index_info` tables
//! directly.

use sea_orm::{ConnectionTrait, FromQueryResult, Statement};

use crate::error::MigrationError;

#[derive(Debug, Clone, FromQueryResult)]
struct SqliteMasterRow {
    r#type: String,
    name: String,
    sql: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LiveColumn {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LiveIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// SQLite auto-creates indices backing `PRIMARY KEY`/`UNIQUE` table
    /// constraints; these show up in `PRAGMA index_list` but were never
    /// issued by a `CREATE INDEX` and must not be diffed as plain keys.
    pub origin: String,
}

#[derive(Debug, Clone)]
pub struct LiveTable {
    pub name: String,
    pub columns: Vec<LiveColumn>,
    pub indices: Vec<LiveIndex>,
}

#[derive(Debug, Clone)]
pub struct LiveView {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default)]
pub struct LiveDatabase {
    pub tables: Vec<LiveTable>,
    pub views: Vec<LiveView>,
}

impl LiveDatabase {
    pub fn find_table(&self, name: &str) -> Option<&LiveTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn find_view(&self, name: &str) -> Option<&LiveView> {
        self.views.iter().find(|v| v.name == name)
    }
}

/// Enumerates every table, column, index, and view currently present in the
/// database `conn` is connected to.
pub async fn introspect<C: ConnectionTrait>(conn: &C) -> Result<LiveDatabase, MigrationError> {
    let backend = conn.get_database_backend();
    let master_rows = SqliteMasterRow::find_by_statement(Statement::from_string(
        backend,
        "SELECT type, name, sql FROM sqlite_master WHERE name NOT LIKE 'sqlite_%'".to_owned(),
    ))
    .all(conn)
    .await?;

    let mut db = LiveDatabase::default();

    for row in master_rows {
        match row.r#type.as_str() {
            "table" => {
                let columns = table_info(conn, &row.name).await?;
                let indices = index_list(conn, &row.name).await?;
                db.tables.push(LiveTable {
                    name: row.name,
                    columns,
                    indices,
                });
            }
            "view" => {
                if let Some(sql) = row.sql {
                    db.views.push(LiveView { name: row.name, sql });
                }
            }
            _ => {}
        }
    }

    Ok(db)
}

#[derive(Debug, FromQueryResult)]
struct TableInfoRow {
    name: String,
    r#type: String,
    notnull: i32,
    dflt_value: Option<String>,
}

async fn table_info<C: ConnectionTrait>(
    conn: &C,
    table: &str,
) -> Result<Vec<LiveColumn>, MigrationError> {
    let backend = conn.get_database_backend();
    let rows = TableInfoRow::find_by_statement(Statement::from_string(
        backend,
        format!("PRAGMA table_info(\"{table}\")"),
    ))
    .all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| LiveColumn {
            name: r.name,
            decl_type: r.r#type,
            not_null: r.notnull != 0,
            default_value: r.dflt_value,
        })
        .collect())
}

#[derive(Debug, FromQueryResult)]
struct IndexListRow {
    name: String,
    unique: i32,
    origin: String,
}

#[derive(Debug, FromQueryResult)]
struct IndexInfoRow {
    name: Option<String>,
}

async fn index_list<C: ConnectionTrait>(
    conn: &C,
    table: &str,
) -> Result<Vec<LiveIndex>, MigrationError> {
    let backend = conn.get_database_backend();
    let rows = IndexListRow::find_by_statement(Statement::from_string(
        backend,
        format!("PRAGMA index_list(\"{table}\")"),
    ))
    .all(conn)
    .await?;

    let mut indices = Vec::with_capacity(rows.len());
    for row in rows {
        let info_rows = IndexInfoRow::find_by_statement(Statement::from_string(
            backend,
            format!("PRAGMA index_info(\"{}\")", row.name),
        ))
        .all(conn)
        .await?;
        let columns = info_rows.into_iter().filter_map(|r| r.name).collect();
        indices.push(LiveIndex {
            name: row.name,
            columns,
            unique: row.unique != 0,
            origin: row.origin,
        });
    }
    Ok(indices)
}
