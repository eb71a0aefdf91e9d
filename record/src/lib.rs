//! The typed record layer: `DbRecord` row wrappers with typed getters and
//! setters, and the process-wide typed-record factory registry.

mod backend;
mod error;
mod record;
mod registry;

pub use backend::RecordBackend;
pub use error::RecordError;
pub use record::DbRecord;
pub use registry::{build, is_registered, register};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fileset::{FileRepository, FilesetError, NoopFileRepository};
    use schema::{Column, LogicalType, Row, Table, Value};
    use sea_orm::{Database, DatabaseConnection};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct FakeBackend {
        conn: DatabaseConnection,
        rows: Mutex<HashMap<(String, String), Row>>,
        next_id: Mutex<u64>,
    }

    #[async_trait]
    impl RecordBackend for FakeBackend {
        async fn insert_row(&self, table: &str, mut row: Row) -> Result<Row, RecordError> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let system_id = format!("id-{}", *next_id);
            row.insert(schema::SYSTEM_ID, Value::Text(system_id.clone()));
            row.insert(schema::SYSTEM_CREATED_AT, Value::Text("2026-01-01T00:00:00Z".to_string()));
            row.insert(schema::SYSTEM_VERSION, Value::Text("v1".to_string()));
            self.rows
                .lock()
                .unwrap()
                .insert((table.to_string(), system_id), row.clone());
            Ok(row)
        }

        async fn update_row(&self, table: &str, system_id: &str, changes: Row) -> Result<(), RecordError> {
            let mut rows = self.rows.lock().unwrap();
            let key = (table.to_string(), system_id.to_string());
            match rows.get_mut(&key) {
                Some(row) => {
                    for (name, value) in changes.iter() {
                        row.insert(name.clone(), value.clone());
                    }
                    Ok(())
                }
                None => Err(RecordError::ConcurrencyConflict {
                    table: table.to_string(),
                    system_id: system_id.to_string(),
                }),
            }
        }

        async fn delete_row(&self, table: &str, system_id: &str) -> Result<(), RecordError> {
            self.rows.lock().unwrap().remove(&(table.to_string(), system_id.to_string()));
            Ok(())
        }

        async fn get_row(&self, table: &str, system_id: &str) -> Result<Option<Row>, RecordError> {
            Ok(self.rows.lock().unwrap().get(&(table.to_string(), system_id.to_string())).cloned())
        }

        fn file_repository(&self) -> Arc<dyn FileRepository> {
            Arc::new(NoopFileRepository::default())
        }

        fn connection(&self) -> DatabaseConnection {
            self.conn.clone()
        }
    }

    async fn fake_backend() -> Arc<FakeBackend> {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        Arc::new(FakeBackend {
            conn,
            rows: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        })
    }

    fn users_table() -> Table {
        Table::new("users")
            .column(Column::new("name", LogicalType::Text).not_null().default_value(""))
            .column(Column::new("email", LogicalType::Text).lww())
    }

    #[tokio::test]
    async fn new_record_is_new_until_saved() {
        let backend = fake_backend().await;
        let mut record = DbRecord::new(backend, users_table(), Row::new().with("name", Value::Text("Alice".into())));
        assert!(record.is_new());
        record.save().await.unwrap();
        assert!(!record.is_new());
        assert!(record.system_id().is_some());
    }

    #[tokio::test]
    async fn setter_on_lww_column_stamps_hlc_companion() {
        let backend = fake_backend().await;
        let mut record = DbRecord::new(backend, users_table(), Row::new().with("name", Value::Text("Alice".into())));
        record.save().await.unwrap();
        record.set_text("email", "alice@example.com").unwrap();
        record.save().await.unwrap();
        assert!(record.get_text("email__hlc").unwrap().is_some());
    }

    #[tokio::test]
    async fn save_with_empty_dirty_set_on_existing_record_is_a_no_op() {
        let backend = fake_backend().await;
        let mut record = DbRecord::new(backend, users_table(), Row::new().with("name", Value::Text("Alice".into())));
        record.save().await.unwrap();
        // No setter called since save(): dirty set is empty.
        record.save().await.unwrap();
    }

    #[tokio::test]
    async fn update_against_a_vanished_row_is_a_concurrency_conflict() {
        let backend = fake_backend().await;
        let mut record = DbRecord::new(backend.clone(), users_table(), Row::new().with("name", Value::Text("Alice".into())));
        record.save().await.unwrap();
        let system_id = record.system_id().unwrap();
        backend.rows.lock().unwrap().remove(&("users".to_string(), system_id));

        record.set_text("name", "Bob").unwrap();
        let result = record.save().await;
        assert!(matches!(result, Err(RecordError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn reload_replaces_values_and_clears_dirty_set() {
        let backend = fake_backend().await;
        let mut record = DbRecord::new(backend.clone(), users_table(), Row::new().with("name", Value::Text("Alice".into())));
        record.save().await.unwrap();
        let system_id = record.system_id().unwrap();

        backend
            .rows
            .lock()
            .unwrap()
            .get_mut(&("users".to_string(), system_id))
            .unwrap()
            .insert("name", Value::Text("Renamed".into()));

        record.set_text("name", "Local edit").unwrap();
        record.reload().await.unwrap();
        assert_eq!(record.get_text("name").unwrap(), Some("Renamed".to_string()));
    }

    #[derive(Clone, Debug, PartialEq)]
    struct User {
        system_id: String,
        name: String,
    }

    #[tokio::test]
    async fn typed_factory_registry_builds_registered_type() {
        register::<User>(|record| User {
            system_id: record.system_id().unwrap_or_default(),
            name: record.get_text("name").unwrap().unwrap_or_default(),
        });
        assert!(is_registered::<User>());

        let backend = fake_backend().await;
        let mut record = DbRecord::new(backend, users_table(), Row::new().with("name", Value::Text("Alice".into())));
        record.save().await.unwrap();
        let user = build::<User>(record);
        assert_eq!(user.name, "Alice");
    }

    #[tokio::test]
    #[should_panic(expected = "no typed-record factory registered")]
    async fn unregistered_type_panics_loudly() {
        #[derive(Debug)]
        struct NeverRegistered;
        let backend = fake_backend().await;
        let record = DbRecord::new(backend, users_table(), Row::new());
        let _: NeverRegistered = build(record);
    }

    // Ensures FilesetError's Display is reachable from this crate's error
    // conversion without a direct dependency cycle back into `engine`.
    #[test]
    fn fileset_error_converts_into_record_error() {
        let err: RecordError = FilesetError::Repository("boom".into()).into();
        assert!(matches!(err, RecordError::Fileset(_)));
    }
}
