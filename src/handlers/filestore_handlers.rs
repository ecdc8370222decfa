//! HTTP handlers for upload, download, and thumbnail delivery.
//! Streams bodies in both directions to avoid buffering whole files in
//! memory and delegates all storage decisions to the service layer; errors
//! are rendered by the configured [`crate::errors::ErrorRenderer`].

use crate::{
    errors::FilestoreError,
    services::{
        AppState,
        filestore_service::{FileSource, SaveFileReceipt, UploadInfo},
        staging::StagingArea,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::Field},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::{io, path::PathBuf};
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// POST `/upload` — multipart form with a `data` file part and an optional
/// `fileId` field.
pub async fn upload_file(State(state): State<AppState>, multipart: Multipart) -> Response {
    match run_upload(&state, multipart).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(err) => state.errors.render(err),
    }
}

async fn run_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<SaveFileReceipt, FilestoreError> {
    let staging = StagingArea::create(&state.filestore.config.tmp_base_dir).await?;
    let outcome = receive_and_save(state, &staging, &mut multipart).await;
    // Unconditional: staging cleanup runs on success and failure alike, and
    // never overrides the pipeline outcome.
    staging.destroy().await;
    outcome
}

async fn receive_and_save(
    state: &AppState,
    staging: &StagingArea,
    multipart: &mut Multipart,
) -> Result<SaveFileReceipt, FilestoreError> {
    let mut file_id: Option<String> = None;
    let mut staged: Option<StagedUpload> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("fileId") => {
                file_id = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("data") => {
                staged = Some(stage_data_field(staging, field).await?);
            }
            other => {
                debug!(field = ?other, "ignoring multipart field");
            }
        }
    }

    if matches!(&file_id, Some(id) if id.is_empty()) {
        return Err(FilestoreError::FileIdMustNotBeEmpty);
    }
    let staged = staged
        .filter(|s| s.info.size.unwrap_or(0) > 0)
        .ok_or(FilestoreError::FileDataMustNotBeEmpty)?;

    state
        .filestore
        .save_file(file_id, FileSource::Path(staged.path), staged.info)
        .await
}

struct StagedUpload {
    path: PathBuf,
    info: UploadInfo,
}

/// Stream the `data` part into the staging area, computing size and an MD5
/// checksum on the way through.
async fn stage_data_field(
    staging: &StagingArea,
    mut field: Field<'_>,
) -> Result<StagedUpload, FilestoreError> {
    let name = field.file_name().map(str::to_string);
    let mime_hint = field.content_type().map(str::to_string);

    let path = staging.path().join("data");
    let mut file = File::create(&path).await?;
    let mut size: i64 = 0;
    let mut digest = md5::Context::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(StagedUpload {
        path,
        info: UploadInfo {
            name,
            size: Some(size),
            mime_hint,
            checksum: Some(format!("{:x}", digest.compute())),
            mtime: None,
        },
    })
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> FilestoreError {
    FilestoreError::Io(io::Error::other(err))
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    file_id: String,
}

/// GET `/download/{file_id}` (optionally with a trailing display filename) —
/// streams the stored bytes with `Content-Disposition: attachment`.
pub async fn download_file(
    State(state): State<AppState>,
    Path(params): Path<DownloadParams>,
) -> Response {
    let result = async {
        let target = state.filestore.resolve_download(&params.file_id).await?;
        stream_file(
            &target.path,
            &target.mime_type,
            &target.display_name,
            &params.file_id,
        )
        .await
    }
    .await;

    match result {
        Ok(response) => response,
        Err(err) => state.errors.render(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct PictureParams {
    file_id: String,
    width: String,
    height: String,
}

/// GET `/picture/{file_id}/{width}/{height}` — streams a cached or freshly
/// rendered thumbnail.
pub async fn show_picture(
    State(state): State<AppState>,
    Path(params): Path<PictureParams>,
) -> Response {
    let result = async {
        let thumbnail = state
            .thumbnails
            .get_thumbnail(&params.file_id, &params.width, &params.height)
            .await?;
        // Cache files carry no extension; the engine always encodes PNG.
        stream_file(
            &thumbnail.path,
            "image/png",
            &thumbnail.display_name,
            &params.file_id,
        )
        .await
    }
    .await;

    match result {
        Ok(response) => response,
        Err(err) => state.errors.render(err),
    }
}

/// Open `path` and build a streaming attachment response.
async fn stream_file(
    path: &std::path::Path,
    mime_type: &str,
    display_name: &str,
    file_id: &str,
) -> Result<Response, FilestoreError> {
    let file = File::open(path).await.map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            // Metadata said ok but the payload is gone; indistinguishable
            // from an unknown file as far as the client is concerned.
            FilestoreError::FileIdNotFound {
                file_id: file_id.to_string(),
            }
        } else {
            FilestoreError::Io(err)
        }
    })?;
    let length = file.metadata().await.map(|m| m.len()).ok();

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    // Display names come out of slugify and are plain ASCII, so the header
    // needs no RFC 5987 encoding. Revisit if non-slugified names ever
    // reach this point.
    debug_assert!(display_name.is_ascii());
    let disposition = format!("attachment; filename=\"{}\"", display_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = length {
        if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
            headers.insert(header::CONTENT_LENGTH, value);
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        errors::ErrorRenderer,
        routes::routes::routes,
        services::{
            AppState,
            filestore_service::{FilestoreService, tests::test_config},
            metadata_store::tests::memory_store,
            thumbnail_service::ThumbnailService,
        },
    };
    use axum::{Router, http::Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::{collections::HashMap, sync::Arc};
    use tower::ServiceExt;

    const BOUNDARY: &str = "filestore-form-boundary";

    async fn test_app(root: &std::path::Path) -> (Router, Arc<AppConfig>) {
        test_app_with_errors(root, ErrorRenderer::new(false, HashMap::new(), HashMap::new()))
            .await
    }

    async fn test_app_with_errors(
        root: &std::path::Path,
        errors: ErrorRenderer,
    ) -> (Router, Arc<AppConfig>) {
        let config = Arc::new(test_config(root));
        tokio::fs::create_dir_all(&config.tmp_base_dir).await.unwrap();
        let store = memory_store().await;
        let state = AppState {
            filestore: FilestoreService::new(store.clone(), config.clone()),
            thumbnails: ThumbnailService::new(store, config.clone()),
            errors,
        };
        (routes(&config.context_path).with_state(state), config)
    }

    fn multipart_body(file_id: Option<&str>, file_name: &str, content: &[u8]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        if let Some(id) = file_id {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\n\
                     Content-Disposition: form-data; name=\"fileId\"\r\n\r\n\
                     {id}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"data\"; filename=\"{file_name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={BOUNDARY}"),
            body,
        )
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn staging_is_empty(config: &AppConfig) -> bool {
        let mut entries = tokio::fs::read_dir(&config.tmp_base_dir).await.unwrap();
        entries.next_entry().await.unwrap().is_none()
    }

    #[tokio::test]
    async fn upload_then_download_over_http() {
        let root = tempfile::tempdir().unwrap();
        let (app, config) = test_app(root.path()).await;

        let (content_type, body) = multipart_body(Some("http-1"), "Photo One.PNG", b"png-bytes");
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/filestore/upload")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let receipt = json_body(response).await;
        assert_eq!(receipt["fileId"], "http-1");
        assert_eq!(receipt["fileUrl"], "/filestore/download/http-1");
        assert!(staging_is_empty(&config).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/filestore/download/http-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"photo-one.png\""
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"png-bytes");
    }

    #[tokio::test]
    async fn empty_data_part_is_rejected_and_staging_removed() {
        let root = tempfile::tempdir().unwrap();
        let (app, config) = test_app(root.path()).await;

        let (content_type, body) = multipart_body(Some("http-empty"), "empty.bin", b"");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/filestore/upload")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Uniform 404 mode is the default rendering.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error = json_body(response).await;
        assert_eq!(error["name"], "FileDataMustNotBeEmptyError");
        assert_eq!(error["code"], 1003);

        // The per-request staging directory is gone even though the
        // pipeline failed.
        assert!(staging_is_empty(&config).await);
    }

    #[tokio::test]
    async fn unknown_id_renders_structured_not_found_body() {
        let root = tempfile::tempdir().unwrap();
        let (app, _config) = test_app(root.path()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/filestore/download/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error = json_body(response).await;
        assert_eq!(error["name"], "FileIdNotFoundError");
        assert_eq!(error["code"], 1002);
        assert_eq!(error["payload"]["fileId"], "ghost");
    }

    #[tokio::test]
    async fn legacy_token_renders_as_plain_text() {
        let root = tempfile::tempdir().unwrap();
        let legacy = HashMap::from([(
            "FileIdNotFoundError".to_string(),
            "FILE_NOT_FOUND".to_string(),
        )]);
        let (app, _config) = test_app_with_errors(
            root.path(),
            ErrorRenderer::new(false, HashMap::new(), legacy),
        )
        .await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/filestore/download/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"FILE_NOT_FOUND");
    }
}
