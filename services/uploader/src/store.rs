//! Remote object store abstraction.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Object store operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read local file {path}: {source}")]
    LocalFile { path: PathBuf, source: io::Error },

    #[error("Object store request failed: {0}")]
    Request(String),

    #[error("No upload ID in multipart response")]
    MissingUploadId,
}

/// Write side of an S3-compatible object store.
///
/// A successful return means the store acknowledged the object; only then may
/// the caller touch the local file. Writing an existing key replaces it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the full contents of `path` to `key`.
    async fn put_file(&self, key: &str, path: &Path) -> Result<(), StoreError>;
}
