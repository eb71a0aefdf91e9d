#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("update matched zero rows for system_id {system_id} in table {table}")]
    ConcurrencyConflict { table: String, system_id: String },
    #[error("no row found for system_id {system_id} in table {table}")]
    NotFound { table: String, system_id: String },
    #[error("column {column} on table {table} is not declared in the schema")]
    UnknownColumn { table: String, column: String },
    #[error("column {column} on table {table} holds {found:?}, expected {expected}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: &'static str,
        found: schema::Value,
    },
    #[error("fileset error: {0}")]
    Fileset(#[from] fileset::FilesetError),
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
}
