//! Upload-then-cleanup for a single segment.
//!
//! Every failure is turned into an [`UploadOutcome`] so one bad segment never
//! stops the rest of a cycle. The local file is removed only after the store
//! has acknowledged the upload, and only when deletion is enabled.

use crate::segment::Segment;
use crate::store::ObjectStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

/// What happened to the local file after a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    Deleted,
    /// Deletion disabled in config
    Retained,
    /// The upload succeeded but the file could not be removed; it will be
    /// uploaded again to the same key next cycle.
    DeleteFailed(String),
}

/// Result of one upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { key: String, cleanup: Cleanup },
    /// `key` is `None` when the segment could not be stat'd, so no key was derived
    Failed { key: Option<String>, error: String },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            UploadOutcome::Uploaded { key, .. } => Some(key),
            UploadOutcome::Failed { key, .. } => key.as_deref(),
        }
    }
}

/// Uploads segments and cleans up after confirmed uploads
pub struct UploadCoordinator<S> {
    store: Arc<S>,
    delete_after_upload: bool,
}

impl<S: ObjectStore> UploadCoordinator<S> {
    pub fn new(store: Arc<S>, delete_after_upload: bool) -> Self {
        Self {
            store,
            delete_after_upload,
        }
    }

    /// Upload one segment and, on success, optionally delete it locally.
    #[instrument(skip(self, segment), fields(camera = %segment.camera, path = %segment.path.display()))]
    pub async fn upload_file(&self, segment: &Segment) -> UploadOutcome {
        let path = segment.path.as_path();

        // Re-read the mtime: it dates the key, and a vanished file fails here.
        let stat = tokio::fs::metadata(path)
            .await
            .and_then(|metadata| Ok((metadata.modified()?, metadata.len())));
        let (key, size) = match stat {
            Ok((modified, size)) => (segment.object_key(modified), size),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Upload failed: cannot stat segment");
                metrics::counter!("uploader.segments.failed").increment(1);
                return UploadOutcome::Failed {
                    key: None,
                    error: e.to_string(),
                };
            }
        };

        info!(path = %path.display(), key = %key, size_bytes = size, "Uploading segment");
        let started = Instant::now();

        if let Err(e) = self.store.put_file(&key, path).await {
            error!(path = %path.display(), key = %key, error = %e, "Upload failed");
            metrics::counter!("uploader.segments.failed").increment(1);
            return UploadOutcome::Failed {
                key: Some(key),
                error: e.to_string(),
            };
        }

        metrics::histogram!("uploader.upload.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        metrics::counter!("uploader.segments.uploaded").increment(1);
        metrics::counter!("uploader.bytes.uploaded").increment(size);
        info!(key = %key, "Upload successful");

        let cleanup = if self.delete_after_upload {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    metrics::counter!("uploader.segments.deleted").increment(1);
                    info!(path = %path.display(), "Deleted local file");
                    Cleanup::Deleted
                }
                Err(e) => {
                    metrics::counter!("uploader.segments.delete_failed").increment(1);
                    error!(path = %path.display(), key = %key, error = %e, "Failed to delete uploaded segment");
                    Cleanup::DeleteFailed(e.to_string())
                }
            }
        } else {
            Cleanup::Retained
        };

        UploadOutcome::Uploaded { key, cleanup }
    }
}
