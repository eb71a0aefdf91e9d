use async_trait::async_trait;
use schema::Row;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::error::RecordError;

/// The engine operation a [`DbRecord`](crate::DbRecord) drives its
/// `save`/`reload`/`delete` calls through. Implemented by `engine::Engine`
/// so this crate never depends on it, mirroring the `stream` crate's
/// `QueryExecutor` inversion.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Inserts `row` into `table`, filling in system columns, and returns the
    /// full stored row (including the generated `system_id`).
    async fn insert_row(&self, table: &str, row: Row) -> Result<Row, RecordError>;

    /// Updates `changes` (a subset of columns) on the row identified by
    /// `system_id` in `table`. Returns `ConcurrencyConflict` if zero rows
    /// matched.
    async fn update_row(&self, table: &str, system_id: &str, changes: Row) -> Result<(), RecordError>;

    /// Deletes the row identified by `system_id` in `table`.
    async fn delete_row(&self, table: &str, system_id: &str) -> Result<(), RecordError>;

    /// Fetches the current row identified by `system_id` in `table`.
    async fn get_row(&self, table: &str, system_id: &str) -> Result<Option<Row>, RecordError>;

    /// The file repository backing `fileset`-typed columns.
    fn file_repository(&self) -> Arc<dyn fileset::FileRepository>;

    /// The raw connection, for `FilesetField`'s own metadata-row queries.
    fn connection(&self) -> DatabaseConnection;
}
