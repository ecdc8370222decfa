//! Defines the filestore HTTP surface.
//!
//! ## Structure
//! - **Health endpoints** (mounted at the root)
//!   - `GET  /healthz` — liveness
//!   - `GET  /readyz`  — readiness (DB + disk checks)
//!
//! - **Filestore endpoints** (nested under the configured context path,
//!   default `/filestore`)
//!   - `POST /upload` — multipart upload (`data` part + optional `fileId`)
//!   - `GET  /download/{file_id}` — stream a stored file
//!   - `GET  /download/{file_id}/{filename}` — same, with a display name in
//!     the URL (the trailing segment is cosmetic and ignored server-side)
//!   - `GET  /picture/{file_id}/{width}/{height}` — stream a thumbnail
//!   - `GET  /picture/{file_id}/{width}/{height}/{filename}` — same, with a
//!     cosmetic display name

use crate::{
    handlers::{
        filestore_handlers::{download_file, show_picture, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all filestore routes.
///
/// The router carries shared state ([`AppState`]) to all handlers; the
/// filestore surface is nested under `context_path`.
pub fn routes(context_path: &str) -> Router<AppState> {
    let filestore = Router::new()
        .route("/upload", post(upload_file))
        .route("/download/{file_id}", get(download_file))
        .route("/download/{file_id}/{filename}", get(download_file))
        .route("/picture/{file_id}/{width}/{height}", get(show_picture))
        .route(
            "/picture/{file_id}/{width}/{height}/{filename}",
            get(show_picture),
        );

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest(context_path, filestore)
}
