//! The fileset logical column type: a row attribute that resolves to a bag
//! of files stored through an abstract [`FileRepository`], plus garbage
//! collection for files and filesets no row references any more.
//!
//! Follows a single backend trait with multiple implementations
//! (`std_fs`, `noop`), narrowed to what a fileset column needs.

mod entity;
pub mod gc;
mod noop;
mod std_fs;

pub use entity::{ActiveModel as FilesetFileActiveModel, Entity as FilesetFileEntity, Model as FilesetFileModel};
pub use noop::NoopFileRepository;
pub use std_fs::StdFsRepository;

use async_trait::async_trait;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use schema::{Column, LogicalType, Table};
use uuid::Uuid;

pub const FILESET_FILES_TABLE: &str = "__fileset_files";

/// The declarative schema for `__fileset_files`, handed to the migrator
/// alongside `__dirty_rows` so it goes through the ordinary diff/create path.
pub fn fileset_files_table_schema() -> Table {
    Table::new(FILESET_FILES_TABLE)
        .without_system_columns()
        .column(Column::new("file_id", LogicalType::Text).not_null())
        .column(Column::new("fileset_id", LogicalType::Text).not_null())
        .column(Column::new("name", LogicalType::Text).not_null())
        .column(Column::new("size", LogicalType::Integer).not_null().default_value(0i64))
        .column(Column::new("mime", LogicalType::Text).not_null().default_value(""))
        .column(Column::new("created_at", LogicalType::Text).not_null())
        .key(schema::Key::primary(["file_id"]))
        .key(schema::Key::indexed(["fileset_id"]))
}

#[derive(Debug, thiserror::Error)]
pub enum FilesetError {
    #[error("file not found: fileset {fileset_id} file {file_id}")]
    FileNotFound { fileset_id: String, file_id: String },
    #[error("file repository error: {0}")]
    Repository(String),
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime: String,
    pub created_at: String,
}

impl From<FilesetFileModel> for FileMetadata {
    fn from(m: FilesetFileModel) -> Self {
        FileMetadata {
            id: m.file_id,
            name: m.name,
            size: m.size as u64,
            mime: m.mime,
            created_at: m.created_at,
        }
    }
}

/// The abstract backend a fileset column stores its bytes through. One
/// instance is shared by every `FilesetField` in a process, injected at
/// `Engine::open`.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn write(&self, fileset_id: &str, file_id: &str, bytes: &[u8]) -> Result<(), FilesetError>;
    async fn read(&self, fileset_id: &str, file_id: &str) -> Result<Vec<u8>, FilesetError>;
    async fn remove(&self, fileset_id: &str, file_id: &str) -> Result<(), FilesetError>;
    /// Every file id physically present under `fileset_id`, independent of
    /// what `__fileset_files` believes — used by GC to find orphan files.
    async fn list_files(&self, fileset_id: &str) -> Result<Vec<String>, FilesetError>;
    /// Every fileset id physically present, independent of what any row
    /// references — used by GC to find orphan filesets.
    async fn list_filesets(&self) -> Result<Vec<String>, FilesetError>;
    async fn remove_fileset(&self, fileset_id: &str) -> Result<(), FilesetError>;
}

/// A handle to one row's fileset column: `addFile`, `getFileContent`,
/// `deleteFile`, `getFiles`, `getFileCount`, `getFileMetadata`.
pub struct FilesetField<'a, C: ConnectionTrait> {
    conn: &'a C,
    repo: &'a dyn FileRepository,
    fileset_id: String,
}

impl<'a, C: ConnectionTrait> FilesetField<'a, C> {
    pub fn new(conn: &'a C, repo: &'a dyn FileRepository, fileset_id: impl Into<String>) -> Self {
        FilesetField {
            conn,
            repo,
            fileset_id: fileset_id.into(),
        }
    }

    pub fn fileset_id(&self) -> &str {
        &self.fileset_id
    }

    pub async fn add_file(&self, name: &str, mime: &str, bytes: &[u8], created_at: &str) -> Result<FileMetadata, FilesetError> {
        let file_id = Uuid::new_v4().to_string();
        self.repo.write(&self.fileset_id, &file_id, bytes).await?;

        let active = entity::ActiveModel {
            file_id: Set(file_id.clone()),
            fileset_id: Set(self.fileset_id.clone()),
            name: Set(name.to_string()),
            size: Set(bytes.len() as i64),
            mime: Set(mime.to_string()),
            created_at: Set(created_at.to_string()),
        };
        entity::Entity::insert(active).exec(self.conn).await?;

        Ok(FileMetadata {
            id: file_id,
            name: name.to_string(),
            size: bytes.len() as u64,
            mime: mime.to_string(),
            created_at: created_at.to_string(),
        })
    }

    pub async fn get_file_content(&self, file_id: &str) -> Result<Vec<u8>, FilesetError> {
        self.repo.read(&self.fileset_id, file_id).await
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), FilesetError> {
        self.repo.remove(&self.fileset_id, file_id).await?;
        entity::Entity::delete_many()
            .filter(entity::Column::FilesetId.eq(self.fileset_id.clone()))
            .filter(entity::Column::FileId.eq(file_id))
            .exec(self.conn)
            .await?;
        Ok(())
    }

    pub async fn get_files(&self) -> Result<Vec<FileMetadata>, FilesetError> {
        let models = entity::Entity::find()
            .filter(entity::Column::FilesetId.eq(self.fileset_id.clone()))
            .all(self.conn)
            .await?;
        Ok(models.into_iter().map(FileMetadata::from).collect())
    }

    pub async fn get_file_count(&self) -> Result<u64, FilesetError> {
        let count = entity::Entity::find()
            .filter(entity::Column::FilesetId.eq(self.fileset_id.clone()))
            .count(self.conn)
            .await?;
        Ok(count)
    }

    pub async fn get_file_metadata(&self, file_id: &str) -> Result<FileMetadata, FilesetError> {
        entity::Entity::find()
            .filter(entity::Column::FilesetId.eq(self.fileset_id.clone()))
            .filter(entity::Column::FileId.eq(file_id))
            .one(self.conn)
            .await?
            .map(FileMetadata::from)
            .ok_or_else(|| FilesetError::FileNotFound {
                fileset_id: self.fileset_id.clone(),
                file_id: file_id.to_string(),
            })
    }
}
