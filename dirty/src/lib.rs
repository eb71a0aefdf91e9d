//! The dirty-row store: a persistent per-row log of pending outbound
//! mutations, keyed by `(table_name, row_id)` so that later mutations
//! replace prior entries rather than append.

mod entity;

use hlc::Hlc;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use schema::{Column, LogicalType, Table};

pub use entity::{ActiveModel as DirtyRowActiveModel, Entity as DirtyRowEntity, Model as DirtyRowModel};

pub const DIRTY_ROWS_TABLE: &str = "__dirty_rows";

/// The declarative schema definition for `__dirty_rows`, handed to the
/// migrator so the hidden table goes through the exact same diff/create path
/// as a user table.
pub fn dirty_rows_table_schema() -> Table {
    Table::new(DIRTY_ROWS_TABLE)
        .without_system_columns()
        .column(Column::new("table_name", LogicalType::Text).not_null())
        .column(Column::new("row_id", LogicalType::Text).not_null())
        .column(Column::new("hlc", LogicalType::Text).not_null())
        .column(Column::new("is_full_row", LogicalType::Integer).not_null().default_value(0i64))
        .column(Column::new("data", LogicalType::Text))
        .key(schema::Key::primary(["table_name", "row_id"]))
}

#[derive(Clone, Debug, PartialEq)]
pub enum DirtyRowData {
    /// Full inserted row.
    Insert(serde_json::Value),
    /// Changed-column subset.
    Update(serde_json::Value),
    /// No payload.
    Delete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DirtyRow {
    pub table_name: String,
    pub row_id: String,
    pub hlc: Hlc,
    pub data: DirtyRowData,
}

impl DirtyRow {
    fn is_full_row(&self) -> bool {
        matches!(self.data, DirtyRowData::Insert(_))
    }

    fn data_json(&self) -> Option<String> {
        match &self.data {
            DirtyRowData::Insert(v) | DirtyRowData::Update(v) => Some(v.to_string()),
            DirtyRowData::Delete => None,
        }
    }

    fn from_model(model: DirtyRowModel) -> Result<Self, DirtyError> {
        let hlc: Hlc = model
            .hlc
            .parse()
            .map_err(|_| DirtyError::MalformedHlc(model.hlc.clone()))?;
        let data = match model.data {
            None => DirtyRowData::Delete,
            Some(raw) => {
                let value: serde_json::Value = serde_json::from_str(&raw)?;
                if model.is_full_row != 0 {
                    DirtyRowData::Insert(value)
                } else {
                    DirtyRowData::Update(value)
                }
            }
        };
        Ok(DirtyRow {
            table_name: model.table_name,
            row_id: model.row_id,
            hlc,
            data,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirtyError {
    #[error("malformed HLC stored in __dirty_rows: {0}")]
    MalformedHlc(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

/// Records and exports pending mutations. One `(table_name, row_id)` has at
/// most one live entry — `record` replaces any prior entry for the same key
/// with the latest HLC, which is both correct for LWW semantics and bounds
/// storage under high churn.
pub struct DirtyRowStore;

impl DirtyRowStore {
    /// Upserts a dirty-row entry within `conn` (expected to be the engine's
    /// own internal write-grouping transaction).
    pub async fn record<C: ConnectionTrait>(conn: &C, row: &DirtyRow) -> Result<(), DirtyError> {
        DirtyRowEntity::delete_many()
            .filter(entity::Column::TableName.eq(row.table_name.clone()))
            .filter(entity::Column::RowId.eq(row.row_id.clone()))
            .exec(conn)
            .await?;

        let active = DirtyRowActiveModel {
            table_name: Set(row.table_name.clone()),
            row_id: Set(row.row_id.clone()),
            hlc: Set(row.hlc.to_string()),
            is_full_row: Set(row.is_full_row() as i32),
            data: Set(row.data_json()),
        };
        DirtyRowEntity::insert(active).exec(conn).await?;
        Ok(())
    }

    /// All pending dirty rows, ordered by HLC ascending.
    pub async fn dirty_rows<C: ConnectionTrait>(conn: &C) -> Result<Vec<DirtyRow>, DirtyError> {
        let models = DirtyRowEntity::find()
            .order_by_asc(entity::Column::Hlc)
            .all(conn)
            .await?;
        models.into_iter().map(DirtyRow::from_model).collect()
    }

    /// Idempotent acknowledgement: removes the entry only if its HLC still
    /// matches, so a stale acknowledgement (superseded by a newer local
    /// write since the export) is a no-op.
    pub async fn remove<C: ConnectionTrait>(
        conn: &C,
        table_name: &str,
        row_id: &str,
        hlc: Hlc,
    ) -> Result<(), DirtyError> {
        DirtyRowEntity::delete_many()
            .filter(entity::Column::TableName.eq(table_name))
            .filter(entity::Column::RowId.eq(row_id))
            .filter(entity::Column::Hlc.eq(hlc.to_string()))
            .exec(conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema as SeaSchema, DbBackend};
    use uuid::Uuid;

    async fn setup() -> DatabaseConnection {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        let builder = conn.get_database_backend();
        let schema = SeaSchema::new(DbBackend::Sqlite);
        let stmt = builder.build(&schema.create_table_from_entity(DirtyRowEntity));
        conn.execute(stmt).await.unwrap();
        conn
    }

    fn hlc(ts: u64) -> Hlc {
        Hlc {
            timestamp: ts,
            version: 0,
            node_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn record_replaces_prior_entry_for_same_key() {
        let conn = setup().await;
        let row1 = DirtyRow {
            table_name: "users".into(),
            row_id: "r1".into(),
            hlc: hlc(1),
            data: DirtyRowData::Update(serde_json::json!({"age": 30})),
        };
        DirtyRowStore::record(&conn, &row1).await.unwrap();

        let row2 = DirtyRow {
            table_name: "users".into(),
            row_id: "r1".into(),
            hlc: hlc(2),
            data: DirtyRowData::Update(serde_json::json!({"age": 31})),
        };
        DirtyRowStore::record(&conn, &row2).await.unwrap();

        let all = DirtyRowStore::dirty_rows(&conn).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].hlc, hlc(2));
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_hlc_gated() {
        let conn = setup().await;
        let row = DirtyRow {
            table_name: "users".into(),
            row_id: "r1".into(),
            hlc: hlc(5),
            data: DirtyRowData::Delete,
        };
        DirtyRowStore::record(&conn, &row).await.unwrap();

        // Stale ack: wrong HLC, should not remove.
        DirtyRowStore::remove(&conn, "users", "r1", hlc(4)).await.unwrap();
        assert_eq!(DirtyRowStore::dirty_rows(&conn).await.unwrap().len(), 1);

        DirtyRowStore::remove(&conn, "users", "r1", hlc(5)).await.unwrap();
        assert_eq!(DirtyRowStore::dirty_rows(&conn).await.unwrap().len(), 0);

        // Idempotent: second removal of an already-gone row is a no-op, not an error.
        DirtyRowStore::remove(&conn, "users", "r1", hlc(5)).await.unwrap();
    }
}
