//! Error taxonomy for the filestore pipelines.
//!
//! Every validation/lookup failure carries a stable name, a numeric code, and
//! an HTTP status. Two rendering modes exist at the HTTP boundary:
//! - structured JSON `{name, message, code, payload?}` (the default), and
//! - a legacy bare-string token for configured error names, kept for
//!   backward compatibility with older clients.
//!
//! With `pretty_error` disabled (the historical behavior) every taxonomy
//! error surfaces as HTTP 404 regardless of its semantic kind; enabling it
//! switches to each error's own status.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{collections::HashMap, io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilestoreError {
    #[error("fileId must not be empty")]
    FileIdMustNotBeEmpty,
    #[error("file `{file_id}` not found")]
    FileIdNotFound { file_id: String },
    #[error("file data must not be empty")]
    FileDataMustNotBeEmpty,
    #[error("width must not be empty")]
    WidthMustNotBeEmpty,
    #[error("width `{value}` must be a positive integer")]
    WidthMustBeInteger { value: String },
    #[error("width {value} exceeds the configured limit {limit}")]
    WidthExceedsLimit { value: u32, limit: u32 },
    #[error("height must not be empty")]
    HeightMustNotBeEmpty,
    #[error("height `{value}` must be a positive integer")]
    HeightMustBeInteger { value: String },
    #[error("height {value} exceeds the configured limit {limit}")]
    HeightExceedsLimit { value: u32, limit: u32 },
    #[error("thumbnail frame {width}x{height} is not in the allowed set")]
    ThumbnailFrameIsMismatched { width: u32, height: u32 },
    #[error("could not create directory `{}`: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("thumbnail rendering failed: {0}")]
    Render(#[from] image::ImageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FilestoreError {
    /// Stable taxonomy name, used for code-table and legacy-string lookup.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileIdMustNotBeEmpty => "FileIdMustNotBeEmptyError",
            Self::FileIdNotFound { .. } => "FileIdNotFoundError",
            Self::FileDataMustNotBeEmpty => "FileDataMustNotBeEmptyError",
            Self::WidthMustNotBeEmpty => "WidthMustNotBeEmptyError",
            Self::WidthMustBeInteger { .. } => "WidthMustBeIntegerError",
            Self::WidthExceedsLimit { .. } => "WidthExceedsLimitError",
            Self::HeightMustNotBeEmpty => "HeightMustNotBeEmptyError",
            Self::HeightMustBeInteger { .. } => "HeightMustBeIntegerError",
            Self::HeightExceedsLimit { .. } => "HeightExceedsLimitError",
            Self::ThumbnailFrameIsMismatched { .. } => "ThumbnailFrameIsMismatchedError",
            Self::DirectoryCreate { .. } => "DirectoryCreateError",
            Self::Render(_) => "ThumbnailRenderingError",
            Self::Sqlx(_) => "MetadataStoreError",
            Self::Io(_) => "StorageIoError",
        }
    }

    /// Default numeric code for this error kind.
    pub fn default_code(&self) -> u32 {
        match self {
            Self::FileIdMustNotBeEmpty => 1001,
            Self::FileIdNotFound { .. } => 1002,
            Self::FileDataMustNotBeEmpty => 1003,
            Self::WidthMustNotBeEmpty => 1004,
            Self::WidthMustBeInteger { .. } => 1005,
            Self::WidthExceedsLimit { .. } => 1006,
            Self::HeightMustNotBeEmpty => 1007,
            Self::HeightMustBeInteger { .. } => 1008,
            Self::HeightExceedsLimit { .. } => 1009,
            Self::ThumbnailFrameIsMismatched { .. } => 1010,
            Self::DirectoryCreate { .. } => 1012,
            Self::Render(_) => 1013,
            Self::Sqlx(_) => 1014,
            Self::Io(_) => 1015,
        }
    }

    /// Default HTTP status, used only when `pretty_error` is enabled.
    pub fn default_status(&self) -> StatusCode {
        match self {
            Self::FileIdNotFound { .. } => StatusCode::NOT_FOUND,
            Self::DirectoryCreate { .. } | Self::Render(_) | Self::Sqlx(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Structured payload describing the offending value and limits, when the
    /// error kind has one.
    pub fn payload(&self) -> Option<Value> {
        match self {
            Self::FileIdNotFound { file_id } => Some(json!({ "fileId": file_id })),
            Self::WidthMustBeInteger { value } | Self::HeightMustBeInteger { value } => {
                Some(json!({ "value": value }))
            }
            Self::WidthExceedsLimit { value, limit }
            | Self::HeightExceedsLimit { value, limit } => {
                Some(json!({ "value": value, "limit": limit }))
            }
            Self::ThumbnailFrameIsMismatched { width, height } => {
                Some(json!({ "width": width, "height": height }))
            }
            Self::DirectoryCreate { path, .. } => {
                Some(json!({ "path": path.display().to_string() }))
            }
            _ => None,
        }
    }
}

/// Per-name overrides of the built-in code table, loaded from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorCodeOverride {
    pub message: Option<String>,
    pub code: Option<u32>,
    pub status: Option<u16>,
}

/// One rendered error, tagged by representation.
#[derive(Debug)]
pub enum ErrorRendering {
    Structured {
        status: StatusCode,
        name: &'static str,
        message: String,
        code: u32,
        payload: Option<Value>,
    },
    LegacyString {
        status: StatusCode,
        token: String,
    },
}

/// Turns a [`FilestoreError`] into the HTTP representation selected by
/// configuration. Built once at startup and shared through the router state.
#[derive(Clone)]
pub struct ErrorRenderer {
    pretty_error: bool,
    code_table: HashMap<String, ErrorCodeOverride>,
    legacy_strings: HashMap<String, String>,
}

impl ErrorRenderer {
    pub fn new(
        pretty_error: bool,
        code_table: HashMap<String, ErrorCodeOverride>,
        legacy_strings: HashMap<String, String>,
    ) -> Self {
        Self {
            pretty_error,
            code_table,
            legacy_strings,
        }
    }

    /// Resolve the tagged representation for `err` without building a response.
    pub fn rendering(&self, err: &FilestoreError) -> ErrorRendering {
        let name = err.name();
        let entry = self.code_table.get(name);

        let status = if self.pretty_error {
            entry.and_then(|s| s.status)
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or_else(|| err.default_status())
        } else {
            // Historical quirk: every pipeline error is reported as 404.
            StatusCode::NOT_FOUND
        };

        if let Some(token) = self.legacy_strings.get(name) {
            return ErrorRendering::LegacyString {
                status,
                token: token.clone(),
            };
        }

        ErrorRendering::Structured {
            status,
            name,
            message: entry
                .and_then(|s| s.message.clone())
                .unwrap_or_else(|| err.to_string()),
            code: entry
                .and_then(|s| s.code)
                .unwrap_or_else(|| err.default_code()),
            payload: err.payload(),
        }
    }

    /// Render `err` as the final HTTP response.
    pub fn render(&self, err: FilestoreError) -> Response {
        tracing::warn!(error = %err, name = err.name(), "request failed");
        match self.rendering(&err) {
            ErrorRendering::Structured {
                status,
                name,
                message,
                code,
                payload,
            } => {
                let mut body = json!({
                    "name": name,
                    "message": message,
                    "code": code,
                });
                if let Some(payload) = payload {
                    body["payload"] = payload;
                }
                (status, Json(body)).into_response()
            }
            ErrorRendering::LegacyString { status, token } => (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                token,
            )
                .into_response(),
        }
    }
}
