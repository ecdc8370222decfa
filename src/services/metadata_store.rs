//! Narrow persistence boundary over the metadata document table.
//!
//! No business logic lives here: just upsert / update / find-one over one
//! row per `file_id` in the configured table. Same-`file_id` writers are
//! synchronized only by SQLite's single-row upsert atomicity; the upload
//! pipeline is the only writer and always upserts at start then updates at
//! completion.

use crate::models::file_record::{FileRecord, FileStatus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Fields written when an upload attempt starts.
#[derive(Debug, Clone)]
pub struct FileRecordDraft {
    pub file_id: String,
    pub name: String,
    pub original_name: Option<String>,
    pub size_bytes: Option<i64>,
    pub mime_hint: Option<String>,
    pub checksum: Option<String>,
    pub mtime: Option<DateTime<Utc>>,
}

/// Fields written when an upload attempt completes.
#[derive(Debug, Clone)]
pub struct FileRecordPatch {
    pub path: String,
    pub file_url: String,
    pub status: FileStatus,
}

#[derive(Clone)]
pub struct MetadataStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,
    table: String,
}

impl MetadataStore {
    /// Create a store over `table`. The table name comes from configuration,
    /// never from request input; it is still sanitized to a plain identifier
    /// before being interpolated into queries.
    pub fn new(db: Arc<SqlitePool>, table: impl Into<String>) -> Self {
        let table: String = table
            .into()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let table = if table.is_empty() {
            "files".to_string()
        } else {
            table
        };
        Self { db, table }
    }

    /// Insert a record for `draft.file_id` with `intermediate` status, or
    /// overwrite the descriptive fields of an existing one. The store-assigned
    /// `id` of an existing row is preserved.
    pub async fn upsert(&self, draft: &FileRecordDraft) -> Result<FileRecord, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO {table} (
                id, file_id, name, original_name, path, file_url, status,
                size_bytes, mime_hint, checksum, mtime
            ) VALUES (?, ?, ?, ?, NULL, NULL, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id) DO UPDATE SET
                name = excluded.name,
                original_name = excluded.original_name,
                status = excluded.status,
                size_bytes = excluded.size_bytes,
                mime_hint = excluded.mime_hint,
                checksum = excluded.checksum,
                mtime = excluded.mtime
            RETURNING id, file_id, name, original_name, path, file_url, status,
                      size_bytes, mime_hint, checksum, mtime
            "#,
            table = self.table
        );

        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(&draft.file_id)
            .bind(&draft.name)
            .bind(&draft.original_name)
            .bind(FileStatus::Intermediate)
            .bind(draft.size_bytes)
            .bind(&draft.mime_hint)
            .bind(&draft.checksum)
            .bind(draft.mtime)
            .fetch_one(&*self.db)
            .await
    }

    /// Apply `patch` to the record for `file_id`. With `allow_insert` off the
    /// row must already exist (the upload pipeline's upsert-at-start creates
    /// it); a missing row surfaces as `RowNotFound`.
    pub async fn update(
        &self,
        file_id: &str,
        patch: &FileRecordPatch,
        allow_insert: bool,
    ) -> Result<(), sqlx::Error> {
        let sql = format!(
            "UPDATE {table} SET path = ?, file_url = ?, status = ? WHERE file_id = ?",
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(&patch.path)
            .bind(&patch.file_url)
            .bind(patch.status)
            .bind(file_id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if !allow_insert {
            return Err(sqlx::Error::RowNotFound);
        }

        let sql = format!(
            r#"
            INSERT INTO {table} (id, file_id, name, path, file_url, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            table = self.table
        );
        sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(file_id)
            .bind(file_id)
            .bind(&patch.path)
            .bind(&patch.file_url)
            .bind(patch.status)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Find the record for `file_id`, optionally restricted to a status.
    /// Serving lookups always pass `Some(FileStatus::Ok)`.
    pub async fn find_one(
        &self,
        file_id: &str,
        status: Option<FileStatus>,
    ) -> Result<Option<FileRecord>, sqlx::Error> {
        let mut sql = format!(
            "SELECT id, file_id, name, original_name, path, file_url, status, \
             size_bytes, mime_hint, checksum, mtime \
             FROM {table} WHERE file_id = ?",
            table = self.table
        );
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }

        let mut query = sqlx::query_as::<_, FileRecord>(&sql).bind(file_id);
        if let Some(status) = status {
            query = query.bind(status);
        }
        query.fetch_optional(&*self.db).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    /// Fresh in-memory store with the migration schema applied.
    pub(crate) async fn memory_store() -> MetadataStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        MetadataStore::new(Arc::new(pool), "files")
    }

    fn draft(file_id: &str, name: &str) -> FileRecordDraft {
        FileRecordDraft {
            file_id: file_id.to_string(),
            name: name.to_string(),
            original_name: Some(name.to_string()),
            size_bytes: Some(42),
            mime_hint: Some("image/png".to_string()),
            checksum: None,
            mtime: None,
        }
    }

    #[tokio::test]
    async fn upsert_creates_intermediate_record() {
        let store = memory_store().await;
        let record = store.upsert(&draft("f-1", "photo.png")).await.unwrap();
        assert_eq!(record.file_id, "f-1");
        assert_eq!(record.status, FileStatus::Intermediate);
        assert_eq!(record.path, None);
    }

    #[tokio::test]
    async fn intermediate_records_are_invisible_to_serving_lookups() {
        let store = memory_store().await;
        store.upsert(&draft("f-2", "photo.png")).await.unwrap();

        let hidden = store.find_one("f-2", Some(FileStatus::Ok)).await.unwrap();
        assert!(hidden.is_none());
        let any = store.find_one("f-2", None).await.unwrap();
        assert!(any.is_some());
    }

    #[tokio::test]
    async fn finalize_flips_status_once_and_preserves_id() {
        let store = memory_store().await;
        let created = store.upsert(&draft("f-3", "photo.png")).await.unwrap();
        let patch = FileRecordPatch {
            path: "/data/files/f-3/photo.png".to_string(),
            file_url: "/filestore/download/f-3".to_string(),
            status: FileStatus::Ok,
        };
        store.update("f-3", &patch, false).await.unwrap();

        let record = store
            .find_one("f-3", Some(FileStatus::Ok))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id, created.id);
        assert_eq!(record.path.as_deref(), Some("/data/files/f-3/photo.png"));
        assert_eq!(record.file_url.as_deref(), Some("/filestore/download/f-3"));
    }

    #[tokio::test]
    async fn update_without_insert_fails_on_missing_row() {
        let store = memory_store().await;
        let patch = FileRecordPatch {
            path: "/nowhere".to_string(),
            file_url: "/filestore/download/ghost".to_string(),
            status: FileStatus::Ok,
        };
        let err = store.update("ghost", &patch, false).await.unwrap_err();
        assert!(matches!(err, sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn update_with_insert_creates_a_minimal_row() {
        let store = memory_store().await;
        let patch = FileRecordPatch {
            path: "/data/files/orphan/orphan".to_string(),
            file_url: "/filestore/download/orphan".to_string(),
            status: FileStatus::Ok,
        };
        store.update("orphan", &patch, true).await.unwrap();

        // The minimal row names the file after its fileId and carries no
        // descriptive fields.
        let record = store
            .find_one("orphan", Some(FileStatus::Ok))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.name, "orphan");
        assert_eq!(record.original_name, None);
        assert_eq!(record.size_bytes, None);
        assert_eq!(record.path.as_deref(), Some("/data/files/orphan/orphan"));

        // A second update now finds the row on the normal path.
        store.update("orphan", &patch, false).await.unwrap();
    }

    #[tokio::test]
    async fn re_upsert_keeps_store_assigned_id() {
        let store = memory_store().await;
        let first = store.upsert(&draft("f-4", "one.png")).await.unwrap();
        let second = store.upsert(&draft("f-4", "two.png")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "two.png");
        assert_eq!(second.status, FileStatus::Intermediate);
    }
}
