//! A [`FileRepository`](crate::FileRepository) backed by ordinary files on
//! disk, one subdirectory per fileset id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::{FileRepository, FilesetError};

pub struct StdFsRepository {
    root: PathBuf,
}

impl StdFsRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StdFsRepository { root: root.into() }
    }

    fn fileset_dir(&self, fileset_id: &str) -> PathBuf {
        self.root.join(fileset_id)
    }

    fn file_path(&self, fileset_id: &str, file_id: &str) -> PathBuf {
        self.fileset_dir(fileset_id).join(file_id)
    }

    fn map_io(err: std::io::Error) -> FilesetError {
        FilesetError::Repository(err.to_string())
    }
}

#[async_trait]
impl FileRepository for StdFsRepository {
    async fn write(&self, fileset_id: &str, file_id: &str, bytes: &[u8]) -> Result<(), FilesetError> {
        let dir = self.fileset_dir(fileset_id);
        fs::create_dir_all(&dir).await.map_err(Self::map_io)?;
        fs::write(self.file_path(fileset_id, file_id), bytes)
            .await
            .map_err(Self::map_io)
    }

    async fn read(&self, fileset_id: &str, file_id: &str) -> Result<Vec<u8>, FilesetError> {
        fs::read(self.file_path(fileset_id, file_id))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    FilesetError::FileNotFound {
                        fileset_id: fileset_id.to_string(),
                        file_id: file_id.to_string(),
                    }
                } else {
                    Self::map_io(e)
                }
            })
    }

    async fn remove(&self, fileset_id: &str, file_id: &str) -> Result<(), FilesetError> {
        match fs::remove_file(self.file_path(fileset_id, file_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io(e)),
        }
    }

    async fn list_files(&self, fileset_id: &str) -> Result<Vec<String>, FilesetError> {
        let dir = self.fileset_dir(fileset_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir).await.map_err(Self::map_io)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Self::map_io)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn list_filesets(&self) -> Result<Vec<String>, FilesetError> {
        if !Path::new(&self.root).exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&self.root).await.map_err(Self::map_io)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Self::map_io)? {
            if entry.file_type().await.map_err(Self::map_io)?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn remove_fileset(&self, fileset_id: &str) -> Result<(), FilesetError> {
        match fs::remove_dir_all(self.fileset_dir(fileset_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StdFsRepository::new(dir.path());
        repo.write("fs1", "file1", b"hello").await.unwrap();
        let bytes = repo.read("fs1", "file1").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn remove_fileset_deletes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StdFsRepository::new(dir.path());
        repo.write("fs1", "file1", b"a").await.unwrap();
        repo.write("fs1", "file2", b"b").await.unwrap();
        repo.remove_fileset("fs1").await.unwrap();
        assert!(repo.list_files("fs1").await.unwrap().is_empty());
    }
}
