//! The error taxonomy, expressed as one enum so every CRUD surface returns
//! the same kinds regardless of which subcrate the failure originated in.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("schema validation failed: {0:?}")]
    SchemaValidation(Vec<schema::SchemaValidationError>),
    #[error("migration failed: {0}")]
    MigrationFailure(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("concurrency conflict: update targeted system_id {system_id} in table {table} but matched zero rows")]
    ConcurrencyConflict { table: String, system_id: String },
    #[error("not found: system_id {system_id} in table {table}")]
    NotFound { table: String, system_id: String },
    #[error("fileset error: {0}")]
    Fileset(#[from] fileset::FilesetError),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl From<migrate::MigrationError> for EngineError {
    fn from(e: migrate::MigrationError) -> Self {
        match e {
            migrate::MigrationError::SchemaValidation(errors) => EngineError::SchemaValidation(errors),
            other => EngineError::MigrationFailure(other.to_string()),
        }
    }
}

impl From<dirty::DirtyError> for EngineError {
    fn from(e: dirty::DirtyError) -> Self {
        EngineError::Internal(e.to_string())
    }
}

impl From<sea_orm::DbErr> for EngineError {
    fn from(e: sea_orm::DbErr) -> Self {
        // SQLite constraint failures surface through sqlx's error message;
        // there is no portable structured variant to match on, so the
        // message is inspected directly.
        let message = e.to_string();
        if message.contains("UNIQUE constraint failed")
            || message.contains("NOT NULL constraint failed")
            || message.contains("FOREIGN KEY constraint failed")
            || message.contains("CHECK constraint failed")
        {
            EngineError::ConstraintViolation(message)
        } else {
            EngineError::Internal(message)
        }
    }
}

impl From<EngineError> for record::RecordError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ConcurrencyConflict { table, system_id } => {
                record::RecordError::ConcurrencyConflict { table, system_id }
            }
            EngineError::NotFound { table, system_id } => record::RecordError::NotFound { table, system_id },
            EngineError::Fileset(err) => record::RecordError::Fileset(err),
            other => record::RecordError::Db(sea_orm::DbErr::Custom(other.to_string())),
        }
    }
}

impl From<EngineError> for stream::StreamError {
    fn from(e: EngineError) -> Self {
        stream::StreamError::Executor(e.to_string())
    }
}
