//! Upload and download pipelines.
//!
//! `save_file` drives the record lifecycle: upsert an `intermediate` record
//! before any byte is moved (so a crash leaves a durable "upload started"
//! trace), materialize the content into the permanent per-file directory,
//! then flip the record to `ok` with a non-inserting update. Any failure
//! after the upsert leaves the record `intermediate` forever; such records
//! are excluded from serving lookups, so this is safe without repair.

use crate::{
    config::AppConfig,
    errors::FilestoreError,
    models::file_record::{FileRecord, FileStatus, FileUrlRef},
    naming,
    services::{
        metadata_store::{FileRecordDraft, FileRecordPatch, MetadataStore},
        staging,
    },
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Concurrency limit for batch file-URL lookups.
const GET_FILE_URLS_CONCURRENCY: usize = 4;

/// Where the bytes of an upload come from.
#[derive(Debug)]
pub enum FileSource {
    /// A staged temporary file, moved into permanent storage.
    Path(PathBuf),
    /// Base64-encoded content, optionally with a `data:<mime>;base64,` prefix.
    Base64(String),
    /// Reserved for future source kinds (e.g. streaming). Materialization is
    /// a deliberate no-op, not a silent failure.
    Unsupported(String),
}

/// Descriptive fields accompanying an upload.
#[derive(Debug, Default, Clone)]
pub struct UploadInfo {
    pub name: Option<String>,
    pub size: Option<i64>,
    pub mime_hint: Option<String>,
    pub checksum: Option<String>,
    pub mtime: Option<DateTime<Utc>>,
}

/// Minimal public descriptor returned from a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct SaveFileReceipt {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "fileId")]
    pub file_id: String,
    #[serde(rename = "fileUrl")]
    pub file_url: String,
}

/// A resolved download: where the bytes live and how to present them.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub path: PathBuf,
    pub mime_type: String,
    pub display_name: String,
}

#[derive(Clone)]
pub struct FilestoreService {
    pub store: MetadataStore,
    pub config: Arc<AppConfig>,
}

impl FilestoreService {
    pub fn new(store: MetadataStore, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// Run the upload pipeline: stage → upsert intermediate → materialize →
    /// finalize → re-read the public descriptor.
    pub async fn save_file(
        &self,
        file_id: Option<String>,
        source: FileSource,
        mut info: UploadInfo,
    ) -> Result<SaveFileReceipt, FilestoreError> {
        if matches!(&file_id, Some(id) if id.is_empty()) {
            return Err(FilestoreError::FileIdMustNotBeEmpty);
        }
        if matches!(&source, FileSource::Base64(content) if content.is_empty()) {
            return Err(FilestoreError::FileDataMustNotBeEmpty);
        }

        let file_id = file_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let original_name = info.name.take().unwrap_or_else(|| file_id.clone());
        let name = naming::slugify(&original_name);

        debug!(file_id, name, "saving file");

        self.store
            .upsert(&FileRecordDraft {
                file_id: file_id.clone(),
                name: name.clone(),
                original_name: Some(original_name),
                size_bytes: info.size,
                mime_hint: info.mime_hint.clone(),
                checksum: info.checksum.clone(),
                mtime: info.mtime,
            })
            .await?;

        let file_dir = self.config.upload_dir.join(&file_id);
        staging::ensure_dir(&file_dir).await?;

        let dest = file_dir.join(&name);
        materialize(source, &dest).await?;

        let file_url = format!("{}/download/{}", self.config.context_path, file_id);
        self.store
            .update(
                &file_id,
                &FileRecordPatch {
                    path: dest.display().to_string(),
                    file_url: file_url.clone(),
                    status: FileStatus::Ok,
                },
                false,
            )
            .await?;

        let record = self
            .store
            .find_one(&file_id, None)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok(SaveFileReceipt {
            id: record.id,
            file_id: record.file_id,
            file_url: record.file_url.unwrap_or(file_url),
        })
    }

    /// Look up the record for serving. Only `ok` records are visible here.
    pub async fn get_file_info(
        &self,
        file_id: &str,
    ) -> Result<Option<FileRecord>, FilestoreError> {
        Ok(self.store.find_one(file_id, Some(FileStatus::Ok)).await?)
    }

    /// Resolve a fileId to a permanent path plus presentation metadata.
    /// An `intermediate` record is treated identically to "not found": it is
    /// not yet safe to serve.
    pub async fn resolve_download(&self, file_id: &str) -> Result<DownloadTarget, FilestoreError> {
        if file_id.is_empty() {
            return Err(FilestoreError::FileIdMustNotBeEmpty);
        }
        let record = self
            .get_file_info(file_id)
            .await?
            .ok_or_else(|| FilestoreError::FileIdNotFound {
                file_id: file_id.to_string(),
            })?;

        let path = self.config.upload_dir.join(&record.file_id).join(&record.name);
        Ok(DownloadTarget {
            mime_type: naming::mime_type(&path),
            display_name: naming::slugify(&record.name),
            path,
        })
    }

    /// Batch lookup of download URLs, fanned out with bounded concurrency.
    /// Output order matches input order; unknown ids keep only their fileId.
    pub async fn get_file_urls(
        &self,
        file_ids: &[String],
    ) -> Result<Vec<FileUrlRef>, FilestoreError> {
        stream::iter(file_ids.iter().cloned().map(|file_id| {
            let store = self.store.clone();
            async move {
                let found = store.find_one(&file_id, None).await?;
                Ok::<_, FilestoreError>(match found {
                    Some(record) => FileUrlRef {
                        id: Some(record.id),
                        file_id,
                        file_url: record.file_url,
                    },
                    None => FileUrlRef {
                        id: None,
                        file_id,
                        file_url: None,
                    },
                })
            }
        }))
        .buffered(GET_FILE_URLS_CONCURRENCY)
        .try_collect()
        .await
    }
}

/// Write the upload content to `dest` according to its source kind.
async fn materialize(source: FileSource, dest: &Path) -> Result<(), FilestoreError> {
    match source {
        FileSource::Path(staged) => {
            if let Err(rename_err) = fs::rename(&staged, dest).await {
                // Staging and permanent storage may sit on different
                // filesystems; fall back to copy + remove.
                match fs::copy(&staged, dest).await {
                    Ok(_) => {
                        let _ = fs::remove_file(&staged).await;
                    }
                    Err(_) => return Err(FilestoreError::Io(rename_err)),
                }
            }
            Ok(())
        }
        FileSource::Base64(content) => {
            let encoded = strip_data_url_prefix(&content);
            let bytes = general_purpose::STANDARD
                .decode(encoded)
                .map_err(|err| {
                    FilestoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        err,
                    ))
                })?;
            fs::write(dest, bytes).await?;
            Ok(())
        }
        FileSource::Unsupported(kind) => {
            warn!(kind, "unsupported file source kind, nothing materialized");
            Ok(())
        }
    }
}

/// Strip a `data:<mime>;base64,` prefix when present.
fn strip_data_url_prefix(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("data:") {
        if let Some(idx) = rest.find(";base64,") {
            return &rest[idx + ";base64,".len()..];
        }
    }
    content
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::metadata_store::tests::memory_store;
    use std::collections::HashMap;

    pub(crate) fn test_config(root: &Path) -> AppConfig {
        AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: String::new(),
            context_path: "/filestore".into(),
            upload_dir: root.join("files"),
            thumbnail_dir: root.join("thumbnails"),
            tmp_base_dir: root.join("tmp"),
            collection: "files".into(),
            thumbnail_max_width: 800,
            thumbnail_max_height: 450,
            thumbnail_frames: Vec::new(),
            placeholder_image: root.join("no-image.png"),
            pretty_error: false,
            legacy_error_strings: HashMap::new(),
            error_codes: HashMap::new(),
        }
    }

    async fn test_service(root: &Path) -> FilestoreService {
        FilestoreService::new(memory_store().await, Arc::new(test_config(root)))
    }

    async fn stage_source(root: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let dir = root.join("incoming");
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(name);
        fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes_and_name() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;
        let source = stage_source(root.path(), "upload", b"png-bytes").await;

        let file_id = "612d388f-0569-427f-88ad-257e52a3b1a5".to_string();
        let receipt = service
            .save_file(
                Some(file_id.clone()),
                FileSource::Path(source),
                UploadInfo {
                    name: Some("Logbeat Image.PNG".into()),
                    size: Some(9),
                    ..UploadInfo::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(receipt.file_id, file_id);
        assert_eq!(receipt.file_url, format!("/filestore/download/{file_id}"));

        let target = service.resolve_download(&file_id).await.unwrap();
        assert_eq!(target.display_name, "logbeat-image.png");
        assert_eq!(target.mime_type, "image/png");
        assert_eq!(fs::read(&target.path).await.unwrap(), b"png-bytes");

        // status == ok implies a readable file at record.path
        let record = service.get_file_info(&file_id).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Ok);
        let path = record.path.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn missing_file_id_and_name_get_generated_defaults() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;
        let source = stage_source(root.path(), "anon", b"data").await;

        let receipt = service
            .save_file(None, FileSource::Path(source), UploadInfo::default())
            .await
            .unwrap();

        // name defaults to the generated fileId, which slugifies to itself
        let record = service
            .get_file_info(&receipt.file_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.name, receipt.file_id);
        assert_eq!(record.original_name, Some(receipt.file_id.clone()));
    }

    #[tokio::test]
    async fn empty_file_id_fails_before_touching_the_store() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        let err = service
            .save_file(
                Some(String::new()),
                FileSource::Base64("aGVsbG8=".into()),
                UploadInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FilestoreError::FileIdMustNotBeEmpty));
        assert!(service.store.find_one("", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_base64_payload_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        let err = service
            .save_file(
                Some("f-empty".into()),
                FileSource::Base64(String::new()),
                UploadInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FilestoreError::FileDataMustNotBeEmpty));
    }

    #[tokio::test]
    async fn base64_source_strips_data_url_prefix() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        let encoded = format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(b"hello-bytes")
        );
        service
            .save_file(
                Some("f-b64".into()),
                FileSource::Base64(encoded),
                UploadInfo {
                    name: Some("inline.png".into()),
                    ..UploadInfo::default()
                },
            )
            .await
            .unwrap();

        let target = service.resolve_download("f-b64").await.unwrap();
        assert_eq!(fs::read(&target.path).await.unwrap(), b"hello-bytes");
    }

    #[tokio::test]
    async fn unknown_file_id_resolves_to_not_found() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        let err = service.resolve_download("unknown").await.unwrap_err();
        assert!(matches!(err, FilestoreError::FileIdNotFound { .. }));
        let err = service.resolve_download("").await.unwrap_err();
        assert!(matches!(err, FilestoreError::FileIdMustNotBeEmpty));
    }

    #[tokio::test]
    async fn failed_materialization_leaves_record_intermediate() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        let err = service
            .save_file(
                Some("f-broken".into()),
                FileSource::Path(root.path().join("does-not-exist")),
                UploadInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FilestoreError::Io(_)));

        let record = service
            .store
            .find_one("f-broken", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, FileStatus::Intermediate);
        // and the intermediate record stays invisible to downloads
        let err = service.resolve_download("f-broken").await.unwrap_err();
        assert!(matches!(err, FilestoreError::FileIdNotFound { .. }));
    }

    #[tokio::test]
    async fn unsupported_source_kind_is_a_noop_placeholder() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        let receipt = service
            .save_file(
                Some("f-stream".into()),
                FileSource::Unsupported("stream".into()),
                UploadInfo {
                    name: Some("later.bin".into()),
                    ..UploadInfo::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.file_id, "f-stream");

        // the record finalizes but nothing was materialized
        let record = service.get_file_info("f-stream").await.unwrap().unwrap();
        assert!(!PathBuf::from(record.path.unwrap()).exists());
    }

    #[tokio::test]
    async fn concurrent_uploads_with_distinct_ids_never_interfere() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        let mut tasks = Vec::new();
        for n in 0..4 {
            let service = service.clone();
            let source = stage_source(root.path(), &format!("part-{n}"), format!("content-{n}").as_bytes()).await;
            tasks.push(tokio::spawn(async move {
                service
                    .save_file(
                        Some(format!("concurrent-{n}")),
                        FileSource::Path(source),
                        UploadInfo {
                            name: Some(format!("file-{n}.txt")),
                            ..UploadInfo::default()
                        },
                    )
                    .await
            }));
        }

        let mut paths = Vec::new();
        for (n, task) in tasks.into_iter().enumerate() {
            let receipt = task.await.unwrap().unwrap();
            assert_eq!(receipt.file_id, format!("concurrent-{n}"));
            let target = service.resolve_download(&receipt.file_id).await.unwrap();
            assert_eq!(
                fs::read(&target.path).await.unwrap(),
                format!("content-{n}").as_bytes()
            );
            paths.push(target.path);
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 4);
    }

    #[tokio::test]
    async fn batch_url_lookup_preserves_input_order() {
        let root = tempfile::tempdir().unwrap();
        let service = test_service(root.path()).await;

        for n in 0..2 {
            let source = stage_source(root.path(), &format!("b-{n}"), b"x").await;
            service
                .save_file(
                    Some(format!("batch-{n}")),
                    FileSource::Path(source),
                    UploadInfo::default(),
                )
                .await
                .unwrap();
        }

        let ids = vec![
            "batch-1".to_string(),
            "missing".to_string(),
            "batch-0".to_string(),
        ];
        let refs = service.get_file_urls(&ids).await.unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].file_id, "batch-1");
        assert_eq!(
            refs[0].file_url.as_deref(),
            Some("/filestore/download/batch-1")
        );
        assert_eq!(refs[1].file_id, "missing");
        assert!(refs[1].file_url.is_none());
        assert!(refs[1].id.is_none());
        assert_eq!(refs[2].file_id, "batch-0");
    }

    #[test]
    fn data_url_prefix_stripping() {
        assert_eq!(strip_data_url_prefix("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url_prefix("QUJD"), "QUJD");
        assert_eq!(strip_data_url_prefix("data:no-marker"), "data:no-marker");
    }
}
