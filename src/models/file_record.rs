//! The persisted metadata document describing one stored file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a stored file.
///
/// A record is created as `Intermediate` before any byte is moved and flips
/// to `Ok` exactly once, when the file is durably placed. Only `Ok` records
/// are discoverable for download or thumbnailing.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Intermediate,
    Ok,
}

/// Metadata document for one stored file, keyed by `file_id`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal UUID for DB indexing (store-assigned).
    pub id: Uuid,

    /// Opaque unique file identifier (caller-supplied or generated).
    pub file_id: String,

    /// Normalized (slugified) storage file name.
    pub name: String,

    /// Name as supplied by the uploader, unmodified.
    pub original_name: Option<String>,

    /// Resolved on-disk location once stored.
    pub path: Option<String>,

    /// Externally addressable download path derived from `file_id`.
    pub file_url: Option<String>,

    /// `intermediate` while bytes are in flight, `ok` once durably placed.
    pub status: FileStatus,

    /// Size in bytes, when known.
    pub size_bytes: Option<i64>,

    /// MIME hint supplied by the uploader.
    pub mime_hint: Option<String>,

    /// MD5 of the staged upload bytes.
    pub checksum: Option<String>,

    /// Last-modified timestamp reported by the uploader.
    pub mtime: Option<DateTime<Utc>>,
}

/// Minimal public descriptor returned from batch URL lookups. Missing
/// records keep only their `file_id` so output order matches input order.
#[derive(Serialize, Clone, Debug)]
pub struct FileUrlRef {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    #[serde(rename = "fileId")]
    pub file_id: String,

    #[serde(rename = "fileUrl", skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}
