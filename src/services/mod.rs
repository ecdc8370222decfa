//! Service layer: metadata persistence, upload/download pipelines, staging
//! areas, and the thumbnail engine.

pub mod filestore_service;
pub mod metadata_store;
pub mod staging;
pub mod thumbnail_service;

use crate::errors::ErrorRenderer;
use filestore_service::FilestoreService;
use thumbnail_service::ThumbnailService;

/// Shared router state carried to every handler.
#[derive(Clone)]
pub struct AppState {
    pub filestore: FilestoreService,
    pub thumbnails: ThumbnailService,
    pub errors: ErrorRenderer,
}
