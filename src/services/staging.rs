//! Scoped staging directories for in-flight uploads.
//!
//! Each upload attempt owns a uniquely named directory under the configured
//! staging root, so concurrent uploads never share one. The directory is
//! removed on every exit path: explicitly via [`StagingArea::destroy`] on the
//! normal path, or from `Drop` when the request future is cancelled
//! mid-upload. Cleanup failures are logged, never fatal — removing the
//! staging area is a side effect, not the pipeline's primary outcome.

use crate::errors::FilestoreError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Create `path` and all intermediate directories, mapping OS-level denial
/// to [`FilestoreError::DirectoryCreate`] with the original error as cause.
pub async fn ensure_dir(path: &Path) -> Result<(), FilestoreError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| FilestoreError::DirectoryCreate {
            path: path.to_path_buf(),
            source,
        })
}

/// An ephemeral working directory owned by exactly one upload attempt.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    armed: bool,
}

impl StagingArea {
    /// Create a fresh staging directory under `root`, named by a newly
    /// generated token.
    pub async fn create(root: &Path) -> Result<Self, FilestoreError> {
        let path = root.join(Uuid::new_v4().to_string());
        ensure_dir(&path).await?;
        debug!(path = %path.display(), "staging area created");
        Ok(Self { path, armed: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively delete the staging directory, best-effort.
    pub async fn destroy(mut self) {
        self.armed = false;
        if let Err(err) = fs::remove_dir_all(&self.path).await {
            warn!(
                path = %self.path.display(),
                error = %err,
                "staging cleanup failed"
            );
        } else {
            debug!(path = %self.path.display(), "staging area removed");
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        // Cancellation safety: if the request is aborted mid-upload the
        // future is dropped without reaching destroy().
        if self.armed {
            if let Err(err) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "staging cleanup on drop failed"
                );
            }
        }
    }
}
