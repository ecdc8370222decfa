//! Thumbnail engine: validation chain, on-disk cache, cover-crop rendering.
//!
//! Cache entries are addressed by `(fileId, width, height)` and never
//! invalidated once present: a hit is returned as-is, a miss is rendered and
//! published with a write-to-temp-then-rename so a concurrent reader can
//! never observe a partially written file. Two concurrent misses may both
//! render; the render is idempotent, so at worst duplicate work occurs.

use crate::{
    config::AppConfig,
    errors::FilestoreError,
    models::file_record::FileStatus,
    naming,
    services::{metadata_store::MetadataStore, staging},
};
use image::GenericImageView;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Display name carried by placeholder thumbnails.
const PLACEHOLDER_NAME: &str = "no-image.png";

/// A resolved thumbnail: the cached file plus its presentation name.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub path: PathBuf,
    pub display_name: String,
}

#[derive(Clone)]
pub struct ThumbnailService {
    pub store: MetadataStore,
    pub config: Arc<AppConfig>,
}

impl ThumbnailService {
    pub fn new(store: MetadataStore, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// Resolve `(fileId, width, height)` to a cached or freshly rendered
    /// thumbnail. Width and height arrive as raw request strings so each
    /// validation step can report its own typed error; the first failure
    /// wins and no file I/O happens before validation passes.
    pub async fn get_thumbnail(
        &self,
        file_id: &str,
        width: &str,
        height: &str,
    ) -> Result<Thumbnail, FilestoreError> {
        if file_id.is_empty() {
            return Err(FilestoreError::FileIdMustNotBeEmpty);
        }
        if width.is_empty() {
            return Err(FilestoreError::WidthMustNotBeEmpty);
        }
        if height.is_empty() {
            return Err(FilestoreError::HeightMustNotBeEmpty);
        }

        let w = parse_dimension(width).ok_or_else(|| FilestoreError::WidthMustBeInteger {
            value: width.to_string(),
        })?;
        let max_width = self.config.thumbnail_max_width;
        if max_width > 0 && w > max_width {
            return Err(FilestoreError::WidthExceedsLimit {
                value: w,
                limit: max_width,
            });
        }

        let h = parse_dimension(height).ok_or_else(|| FilestoreError::HeightMustBeInteger {
            value: height.to_string(),
        })?;
        let max_height = self.config.thumbnail_max_height;
        if max_height > 0 && h > max_height {
            return Err(FilestoreError::HeightExceedsLimit {
                value: h,
                limit: max_height,
            });
        }

        let frames = &self.config.thumbnail_frames;
        if !frames.is_empty() && !frames.contains(&[w, h]) {
            return Err(FilestoreError::ThumbnailFrameIsMismatched {
                width: w,
                height: h,
            });
        }

        // An unknown file (or a record with no name) gets the placeholder
        // image instead of an error; its cache entries use a distinct naming
        // scheme so they never collide with real per-file caches.
        let record = self.store.find_one(file_id, Some(FileStatus::Ok)).await?;
        let (origin, cache_path, display_name) = match record {
            Some(record) if !record.name.is_empty() => (
                self.config.upload_dir.join(file_id).join(&record.name),
                self.config
                    .thumbnail_dir
                    .join(file_id)
                    .join(format!("thumbnail-{w}x{h}")),
                naming::slugify(&record.name),
            ),
            _ => (
                self.config.placeholder_image.clone(),
                self.config
                    .thumbnail_dir
                    .join(format!("no-image-thumbnail-{w}x{h}")),
                naming::slugify(PLACEHOLDER_NAME),
            ),
        };

        if fs::metadata(&cache_path).await.is_ok() {
            debug!(cache = %cache_path.display(), "thumbnail cache hit");
            return Ok(Thumbnail {
                path: cache_path,
                display_name,
            });
        }

        if let Some(parent) = cache_path.parent() {
            staging::ensure_dir(parent).await?;
        }

        let render_target = cache_path.clone();
        tokio::task::spawn_blocking(move || render_cover(&origin, &render_target, w, h))
            .await
            .map_err(|err| FilestoreError::Io(io::Error::other(err)))??;

        Ok(Thumbnail {
            path: cache_path,
            display_name,
        })
    }
}

/// Positive integers only.
fn parse_dimension(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|v| *v > 0)
}

/// Crop-and-resize `origin` to exactly `width x height` (cover semantics) and
/// publish it at `cache_path` via temp file + rename.
fn render_cover(
    origin: &Path,
    cache_path: &Path,
    width: u32,
    height: u32,
) -> Result<(), FilestoreError> {
    let img = image::open(origin)?;
    let (orig_width, orig_height) = img.dimensions();
    let filter = select_filter(orig_width, orig_height, width, height);
    let thumbnail = img.resize_to_fill(width, height, filter);

    let tmp_path = cache_path.with_file_name(format!(".tmp-{}", Uuid::new_v4()));
    thumbnail.save_with_format(&tmp_path, image::ImageFormat::Png)?;
    if let Err(err) = std::fs::rename(&tmp_path, cache_path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(FilestoreError::Io(err));
    }

    debug!(
        cache = %cache_path.display(),
        width, height, "thumbnail rendered"
    );
    Ok(())
}

/// Pick a resampling filter from the downscale ratio: cheaper filters for
/// strong reductions, Lanczos for near-1:1 work.
fn select_filter(
    orig_width: u32,
    orig_height: u32,
    new_width: u32,
    new_height: u32,
) -> image::imageops::FilterType {
    let width_ratio = orig_width as f32 / new_width as f32;
    let height_ratio = orig_height as f32 / new_height as f32;
    let max_ratio = width_ratio.max(height_ratio);

    if max_ratio > 2.0 {
        image::imageops::FilterType::Triangle
    } else if max_ratio > 1.5 {
        image::imageops::FilterType::CatmullRom
    } else {
        image::imageops::FilterType::Lanczos3
    }
}
