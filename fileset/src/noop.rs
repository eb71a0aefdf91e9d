//! A [`FileRepository`](crate::FileRepository) test double that discards
//! every write and reports no files, the fileset-side equivalent of the
//! teacher's `fsio::noop_fs`.

use async_trait::async_trait;

use crate::{FileRepository, FilesetError};

#[derive(Default)]
pub struct NoopFileRepository;

impl NoopFileRepository {
    pub fn new() -> Self {
        NoopFileRepository
    }
}

#[async_trait]
impl FileRepository for NoopFileRepository {
    async fn write(&self, _fileset_id: &str, _file_id: &str, _bytes: &[u8]) -> Result<(), FilesetError> {
        Ok(())
    }

    async fn read(&self, fileset_id: &str, file_id: &str) -> Result<Vec<u8>, FilesetError> {
        Err(FilesetError::FileNotFound {
            fileset_id: fileset_id.to_string(),
            file_id: file_id.to_string(),
        })
    }

    async fn remove(&self, _fileset_id: &str, _file_id: &str) -> Result<(), FilesetError> {
        Ok(())
    }

    async fn list_files(&self, _fileset_id: &str) -> Result<Vec<String>, FilesetError> {
        Ok(Vec::new())
    }

    async fn list_filesets(&self) -> Result<Vec<String>, FilesetError> {
        Ok(Vec::new())
    }

    async fn remove_fileset(&self, _fileset_id: &str) -> Result<(), FilesetError> {
        Ok(())
    }
}
