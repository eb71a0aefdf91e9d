//! The embedded database engine: ties the schema model, the schema-diff
//! migrator, the dirty-row export log, the fileset subsystem, the reactive
//! streaming-query engine, and the typed record layer behind one
//! `Engine::open` entry point.

mod backend;
mod config;
mod crud;
mod error;
mod gc;
mod query;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use schema::Schema;

pub use config::EngineConfig;
pub use error::EngineError;

/// The open handle to a declarative, offline-first database. Every mutation
/// and query goes through this type; `stream`/`new_record`/`get_record` hand
/// out the reactive and typed-record surfaces layered on top of it.
pub struct Engine {
    conn: DatabaseConnection,
    schema: Arc<Schema>,
    file_repo: Arc<dyn fileset::FileRepository>,
    stream_manager: Arc<stream::QueryStreamManager>,
    dispose_timeout: Duration,
    next_stream_id: AtomicU64,
}

/// Folds the maximum HLC already persisted across every table's
/// `system_version` and LWW `*__hlc` companion columns into the global clock,
/// so a fresh process never generates a write that sorts behind one already
/// on disk.
async fn bootstrap_clock(conn: &DatabaseConnection, schema: &Schema) -> Result<(), EngineError> {
    let mut max_hlc: Option<hlc::Hlc> = None;

    for table in &schema.tables {
        let mut hlc_columns = vec![schema::SYSTEM_VERSION.to_string()];
        hlc_columns.extend(table.lww_columns().map(|c| c.hlc_companion_name()));

        for column in &hlc_columns {
            let sql = format!(
                "SELECT \"{column}\" AS hlc_value FROM \"{}\" WHERE \"{column}\" IS NOT NULL",
                table.name
            );
            let stmt = Statement::from_string(conn.get_database_backend(), sql);
            // A brand-new schema has no table yet on a fresh database file;
            // that's not an error here, just nothing to fold in.
            let Ok(rows) = conn.query_all(stmt).await else {
                continue;
            };
            for row in rows {
                if let Ok(Some(raw)) = row.try_get::<Option<String>>("", "hlc_value") {
                    if let Ok(parsed) = raw.parse::<hlc::Hlc>() {
                        max_hlc = Some(match max_hlc {
                            Some(current) if current >= parsed => current,
                            _ => parsed,
                        });
                    }
                }
            }
        }
    }

    if let Some(hlc) = max_hlc {
        hlc::HlcClock::global().observe(hlc);
    }
    Ok(())
}

impl Engine {
    /// Opens (creating the file if absent) the SQLite database at `path`,
    /// migrates it to match `schema`, bootstraps the process HLC clock from
    /// whatever is already on disk, and returns the live engine. `path` may
    /// be `":memory:"` for an ephemeral in-process database.
    pub async fn open(
        path: &str,
        schema: Schema,
        files: Arc<dyn fileset::FileRepository>,
        config: EngineConfig,
    ) -> Result<Arc<Engine>, EngineError> {
        schema.validate().map_err(EngineError::SchemaValidation)?;

        let connection_string = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let conn = Database::connect(&connection_string).await?;

        for pragma in &config.pragmas {
            conn.execute(Statement::from_string(conn.get_database_backend(), pragma.clone()))
                .await?;
        }

        let extra_tables = [dirty::dirty_rows_table_schema(), fileset::fileset_files_table_schema()];
        migrate::run(&conn, &schema, &extra_tables).await?;

        bootstrap_clock(&conn, &schema).await?;

        info!("engine: opened {path} with {} table(s)", schema.tables.len());

        let stream_manager = Arc::new(stream::QueryStreamManager::new(config.buffer_window, config.dispose_timeout));

        Ok(Arc::new(Engine {
            conn,
            schema: Arc::new(schema),
            file_repo: files,
            stream_manager,
            dispose_timeout: config.dispose_timeout,
            next_stream_id: AtomicU64::new(1),
        }))
    }

    /// Disposes every live streaming query and stops their batching task.
    /// Does not close the underlying connection pool — `sea_orm` closes it
    /// when the last clone of `Engine` (and thus `DatabaseConnection`) drops.
    pub async fn close(&self) {
        self.stream_manager.dispose().await;
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Any attempt to reach a raw, caller-driven multi-statement transaction
    /// through the engine is refused: internal write grouping (one mutation
    /// plus its `__dirty_rows` entry) is this engine's own concern, not a
    /// surface it exposes further.
    pub fn transaction(&self) -> Result<(), EngineError> {
        Err(EngineError::UnsupportedOperation(
            "Engine does not expose caller-driven transactions".to_string(),
        ))
    }

    /// Builds a reactive [`stream::StreamingQuery`] over `query`, mapping
    /// each result row through `mapper`. The returned query is inert until
    /// the first [`stream::StreamingQuery::subscribe`] call.
    pub fn stream<T: Clone + Send + Sync + 'static>(
        self: &Arc<Self>,
        query: schema::Query,
        mapper: impl Fn(schema::Row) -> T + Send + Sync + 'static,
    ) -> Arc<stream::StreamingQuery<T>> {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let executor: Arc<dyn stream::QueryExecutor> = self.clone();
        stream::StreamingQuery::new(
            id,
            query,
            self.schema.clone(),
            executor,
            Arc::downgrade(&self.stream_manager),
            self.dispose_timeout,
            mapper,
        )
    }

    /// Builds a new, not-yet-saved [`record::DbRecord`] for `table`.
    pub fn new_record(self: &Arc<Self>, table: &str) -> Result<record::DbRecord, EngineError> {
        let table_def = self.table(table)?.clone();
        let backend: Arc<dyn record::RecordBackend> = self.clone();
        Ok(record::DbRecord::new(backend, table_def, schema::Row::new()))
    }

    /// Fetches the row identified by `system_id` in `table` as a
    /// [`record::DbRecord`].
    pub async fn get_record(self: &Arc<Self>, table: &str, system_id: &str) -> Result<record::DbRecord, EngineError> {
        let table_def = self.table(table)?.clone();
        let row = self
            .fetch_row(table, system_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                table: table.to_string(),
                system_id: system_id.to_string(),
            })?;
        let backend: Arc<dyn record::RecordBackend> = self.clone();
        Ok(record::DbRecord::from_row(backend, table_def, row))
    }

    /// `streamTyped<T>`: like [`Engine::stream`], but each
    /// row is first wrapped as a [`record::DbRecord`] and then passed through
    /// the typed-record factory registered for `T`, rather than through a
    /// caller-supplied mapper closure.
    pub fn stream_typed<T: Clone + Send + Sync + 'static>(
        self: &Arc<Self>,
        query: schema::Query,
    ) -> Result<Arc<stream::StreamingQuery<T>>, EngineError> {
        let table_def = self.table(&query.from.0)?.clone();
        let backend: Arc<dyn record::RecordBackend> = self.clone();
        Ok(self.stream(query, move |row| {
            record::build::<T>(record::DbRecord::from_row(backend.clone(), table_def.clone(), row))
        }))
    }
}
