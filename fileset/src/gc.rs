//! Garbage collection for the fileset subsystem: orphan
//! filesets (referenced by no row) and orphan files (present in a live
//! fileset but unknown to `__fileset_files`). This is a maintenance task the
//! caller schedules explicitly — the engine never starts a background timer
//! for it.

use std::collections::HashSet;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use crate::{entity, FileRepository, FilesetError};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OrphanReport {
    pub filesets_removed: Vec<String>,
    pub files_removed: Vec<(String, String)>,
}

/// Removes every fileset not present in `referenced_fileset_ids` (the set of
/// fileset ids some row's fileset column currently holds, computed by the
/// caller since this crate has no visibility into user tables), and every
/// file physically present under a still-referenced fileset that
/// `__fileset_files` has no metadata row for.
pub async fn collect_orphans<C: ConnectionTrait>(
    conn: &C,
    repo: &dyn FileRepository,
    referenced_fileset_ids: &HashSet<String>,
) -> Result<OrphanReport, FilesetError> {
    let mut report = OrphanReport::default();

    let known_filesets = repo.list_filesets().await?;
    for fileset_id in known_filesets {
        if !referenced_fileset_ids.contains(&fileset_id) {
            repo.remove_fileset(&fileset_id).await?;
            entity::Entity::delete_many()
                .filter(entity::Column::FilesetId.eq(fileset_id.clone()))
                .exec(conn)
                .await?;
            report.filesets_removed.push(fileset_id);
        }
    }

    for fileset_id in referenced_fileset_ids {
        let known_files: HashSet<String> = entity::Entity::find()
            .filter(entity::Column::FilesetId.eq(fileset_id.clone()))
            .all(conn)
            .await?
            .into_iter()
            .map(|m| m.file_id)
            .collect();

        for file_id in repo.list_files(fileset_id).await? {
            if !known_files.contains(&file_id) {
                repo.remove(fileset_id, &file_id).await?;
                report.files_removed.push((fileset_id.clone(), file_id));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::std_fs::StdFsRepository;
    use sea_orm::{Database, Schema as SeaSchema, DbBackend};

    async fn setup() -> sea_orm::DatabaseConnection {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        let schema = SeaSchema::new(DbBackend::Sqlite);
        let stmt = conn
            .get_database_backend()
            .build(&schema.create_table_from_entity(entity::Entity));
        conn.execute(stmt).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn unreferenced_fileset_is_removed() {
        let conn = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let repo = StdFsRepository::new(dir.path());
        repo.write("orphan", "f1", b"x").await.unwrap();

        let referenced = HashSet::new();
        let report = collect_orphans(&conn, &repo, &referenced).await.unwrap();
        assert_eq!(report.filesets_removed, vec!["orphan".to_string()]);
        assert!(repo.list_files("orphan").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_file_under_live_fileset_is_removed() {
        let conn = setup().await;
        let dir = tempfile::tempdir().unwrap();
        let repo = StdFsRepository::new(dir.path());
        repo.write("live", "untracked", b"x").await.unwrap();

        let mut referenced = HashSet::new();
        referenced.insert("live".to_string());
        let report = collect_orphans(&conn, &repo, &referenced).await.unwrap();
        assert_eq!(report.files_removed, vec![("live".to_string(), "untracked".to_string())]);
    }
}
