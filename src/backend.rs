//! Wires `Engine` into the two inversion-of-control traits the leaf crates
//! define so they never depend on this one: `stream::QueryExecutor` (so a
//! `StreamingQuery` can refresh itself) and `record::RecordBackend` (so a
//! `DbRecord` can persist itself) — the generic algorithm is handed a trait
//! object rather than depending on the concrete backend.

use std::sync::Arc;

use async_trait::async_trait;
use fileset::FileRepository;
use record::{RecordBackend, RecordError};
use schema::{Query, Row};
use sea_orm::DatabaseConnection;
use stream::{QueryExecutor, StreamError};

use crate::Engine;

#[async_trait]
impl QueryExecutor for Engine {
    async fn query_maps(&self, query: &Query) -> Result<Vec<Row>, StreamError> {
        Engine::query_maps(self, query).await.map_err(Into::into)
    }
}

#[async_trait]
impl RecordBackend for Engine {
    async fn insert_row(&self, table: &str, row: Row) -> Result<Row, RecordError> {
        self.insert(table, row).await.map_err(Into::into)
    }

    async fn update_row(&self, table: &str, system_id: &str, changes: Row) -> Result<(), RecordError> {
        self.update_by_id(table, system_id, changes).await.map_err(Into::into)
    }

    async fn delete_row(&self, table: &str, system_id: &str) -> Result<(), RecordError> {
        self.delete_by_id(table, system_id).await.map_err(Into::into)
    }

    async fn get_row(&self, table: &str, system_id: &str) -> Result<Option<Row>, RecordError> {
        self.fetch_row(table, system_id).await.map_err(Into::into)
    }

    fn file_repository(&self) -> Arc<dyn FileRepository> {
        self.file_repo.clone()
    }

    fn connection(&self) -> DatabaseConnection {
        self.conn.clone()
    }
}
