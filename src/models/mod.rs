//! Data models for the filestore service.
//!
//! The entities map to SQLite rows via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod file_record;
