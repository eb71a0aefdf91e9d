use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fileset::FilesetField;
use schema::{Row, Table, Value};
use sea_orm::DatabaseConnection;

use crate::backend::RecordBackend;
use crate::error::RecordError;

/// One row: a table name, the current-values map, the set of columns
/// touched since the last `save()`, and whether this instance has ever been
/// persisted.
pub struct DbRecord {
    backend: Arc<dyn RecordBackend>,
    conn: DatabaseConnection,
    table: Table,
    values: Row,
    dirty: HashSet<String>,
    is_new: bool,
}

impl DbRecord {
    /// Builds a record from a freshly-constructed (not yet saved) values map.
    pub fn new(backend: Arc<dyn RecordBackend>, table: Table, values: Row) -> Self {
        let conn = backend.connection();
        DbRecord {
            backend,
            conn,
            table,
            values,
            dirty: HashSet::new(),
            is_new: true,
        }
    }

    /// Builds a record from a row returned by a query. A row missing
    /// `system_id` is treated as new.
    pub fn from_row(backend: Arc<dyn RecordBackend>, table: Table, values: Row) -> Self {
        let is_new = values.get(schema::SYSTEM_ID).is_none();
        let conn = backend.connection();
        DbRecord {
            backend,
            conn,
            table,
            values,
            dirty: HashSet::new(),
            is_new,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn system_id(&self) -> Option<String> {
        match self.values.get(schema::SYSTEM_ID) {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn require_column(&self, name: &str) -> Result<(), RecordError> {
        if self.table.has_column(name) {
            Ok(())
        } else {
            Err(RecordError::UnknownColumn {
                table: self.table.name.clone(),
                column: name.to_string(),
            })
        }
    }

    // --- typed getters -----------------------------------------------

    pub fn get_text(&self, column: &str) -> Result<Option<String>, RecordError> {
        self.require_column(column)?;
        Ok(match self.values.get(column) {
            Some(Value::Text(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(RecordError::TypeMismatch {
                    table: self.table.name.clone(),
                    column: column.to_string(),
                    expected: "Text",
                    found: other.clone(),
                })
            }
        })
    }

    pub fn get_text_required(&self, column: &str) -> Result<String, RecordError> {
        self.get_text(column)?.ok_or_else(|| RecordError::TypeMismatch {
            table: self.table.name.clone(),
            column: column.to_string(),
            expected: "Text (non-null)",
            found: Value::Null,
        })
    }

    pub fn get_integer(&self, column: &str) -> Result<Option<i64>, RecordError> {
        self.require_column(column)?;
        Ok(match self.values.get(column) {
            Some(Value::Integer(i)) => Some(*i),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(RecordError::TypeMismatch {
                    table: self.table.name.clone(),
                    column: column.to_string(),
                    expected: "Integer",
                    found: other.clone(),
                })
            }
        })
    }

    pub fn get_real(&self, column: &str) -> Result<Option<f64>, RecordError> {
        self.require_column(column)?;
        Ok(match self.values.get(column) {
            Some(Value::Real(f)) => Some(*f),
            Some(Value::Integer(i)) => Some(*i as f64),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(RecordError::TypeMismatch {
                    table: self.table.name.clone(),
                    column: column.to_string(),
                    expected: "Real",
                    found: other.clone(),
                })
            }
        })
    }

    /// Lazily parses an ISO-8601 string column into a timestamp.
    pub fn get_date_time(&self, column: &str) -> Result<Option<DateTime<Utc>>, RecordError> {
        match self.get_text(column)? {
            None => Ok(None),
            Some(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|_| RecordError::TypeMismatch {
                    table: self.table.name.clone(),
                    column: column.to_string(),
                    expected: "ISO-8601 datetime",
                    found: Value::Text(s),
                }),
        }
    }

    /// The fileset identifier stored in `column`, resolved to a handle over
    /// this record's file repository.
    pub fn get_fileset_field(&self, column: &str) -> Result<FilesetField<'_, DatabaseConnection>, RecordError> {
        let fileset_id = self.get_text_required(column)?;
        Ok(FilesetField::new(&self.conn, &*self.backend.file_repository(), fileset_id))
    }

    // --- typed setters -----------------------------------------------

    fn set_value(&mut self, column: &str, value: Value) -> Result<(), RecordError> {
        self.require_column(column)?;
        self.values.insert(column, value);
        self.dirty.insert(column.to_string());

        if let Some(col) = self.table.columns.iter().find(|c| c.name == column) {
            if col.lww {
                let hlc_column = col.hlc_companion_name();
                let hlc = hlc::HlcClock::global().now();
                self.values.insert(hlc_column.clone(), Value::Text(hlc.to_string()));
                self.dirty.insert(hlc_column);
            }
        }
        Ok(())
    }

    pub fn set_text(&mut self, column: &str, value: impl Into<String>) -> Result<(), RecordError> {
        self.set_value(column, Value::Text(value.into()))
    }

    pub fn set_integer(&mut self, column: &str, value: i64) -> Result<(), RecordError> {
        self.set_value(column, Value::Integer(value))
    }

    pub fn set_real(&mut self, column: &str, value: f64) -> Result<(), RecordError> {
        self.set_value(column, Value::Real(value))
    }

    pub fn set_null(&mut self, column: &str) -> Result<(), RecordError> {
        self.set_value(column, Value::Null)
    }

    pub fn set_date_time(&mut self, column: &str, value: DateTime<Utc>) -> Result<(), RecordError> {
        self.set_value(column, Value::Text(value.to_rfc3339()))
    }

    /// Sets a fileset column to point at an already-created fileset id
    /// (creation of filesets themselves happens through the resulting
    /// `FilesetField`, not through this setter).
    pub fn set_fileset_id(&mut self, column: &str, fileset_id: impl Into<String>) -> Result<(), RecordError> {
        self.set_value(column, Value::Text(fileset_id.into()))
    }

    // --- persistence ---------------------------------------------------

    /// Inserts (if new) or updates the dirty subset (otherwise). A no-op if
    /// the dirty set is empty on an existing record.
    pub async fn save(&mut self) -> Result<(), RecordError> {
        if self.is_new {
            let stored = self.backend.insert_row(&self.table.name, self.values.clone()).await?;
            self.values = stored;
            self.is_new = false;
            self.dirty.clear();
            return Ok(());
        }

        if self.dirty.is_empty() {
            return Ok(());
        }

        let system_id = self.system_id().ok_or_else(|| RecordError::NotFound {
            table: self.table.name.clone(),
            system_id: String::new(),
        })?;

        let mut changes = Row::new();
        for column in &self.dirty {
            if let Some(value) = self.values.get(column) {
                changes.insert(column.clone(), value.clone());
            }
        }

        self.backend.update_row(&self.table.name, &system_id, changes).await?;
        self.dirty.clear();
        Ok(())
    }

    /// Re-fetches the row by `system_id`, discarding any pending edits.
    pub async fn reload(&mut self) -> Result<(), RecordError> {
        let system_id = self.system_id().ok_or_else(|| RecordError::NotFound {
            table: self.table.name.clone(),
            system_id: String::new(),
        })?;
        let row = self
            .backend
            .get_row(&self.table.name, &system_id)
            .await?
            .ok_or_else(|| RecordError::NotFound {
                table: self.table.name.clone(),
                system_id: system_id.clone(),
            })?;
        self.values = row;
        self.dirty.clear();
        self.is_new = false;
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), RecordError> {
        let system_id = self.system_id().ok_or_else(|| RecordError::NotFound {
            table: self.table.name.clone(),
            system_id: String::new(),
        })?;
        self.backend.delete_row(&self.table.name, &system_id).await
    }
}
