use schema::SchemaValidationError;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("schema validation failed: {0:?}")]
    SchemaValidation(Vec<SchemaValidationError>),
    #[error("migration step failed: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("introspection returned malformed data: {0}")]
    Introspection(String),
}
