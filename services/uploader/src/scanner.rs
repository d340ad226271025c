//! Discovery of completed segments under the storage root.
//!
//! The recorder gives no end-of-write signal, so a segment counts as complete
//! once its modification time is more than [`COMPLETENESS_THRESHOLD`] in the
//! past. Shortening the threshold risks uploading a file that is still being
//! written; lengthening it only delays backup.

use crate::config::StorageConfig;
use crate::segment::Segment;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Age a segment must exceed before it is considered complete.
pub const COMPLETENESS_THRESHOLD: Duration = Duration::from_secs(300);

/// Errors that abort a scan. Problems inside a single camera directory never
/// do; that camera is skipped and the rest are still scanned.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read storage root {path}: {source}")]
    StorageRoot { path: PathBuf, source: io::Error },
}

/// Walks `{root}/{camera}/*.{extension}` for segments ready to upload.
#[derive(Debug, Clone)]
pub struct SegmentScanner {
    root: PathBuf,
    extension: String,
    threshold: Duration,
}

impl SegmentScanner {
    /// Create a new scanner over the configured storage root
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.local_path.clone(),
            extension: config.segment_extension.clone(),
            threshold: COMPLETENESS_THRESHOLD,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find completed segments as of now.
    pub fn find_completed_segments(&self) -> Result<Vec<Segment>, ScanError> {
        self.find_completed_segments_at(SystemTime::now())
    }

    /// Find segments whose age at `now` exceeds the completeness threshold,
    /// sorted by full path.
    pub fn find_completed_segments_at(&self, now: SystemTime) -> Result<Vec<Segment>, ScanError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ScanError::StorageRoot {
            path: self.root.clone(),
            source,
        })?;

        let mut segments = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|source| ScanError::StorageRoot {
                path: self.root.clone(),
                source,
            })?;
            let camera_dir = entry.path();

            // Follows symlinks, so a linked camera directory still counts.
            if !camera_dir.is_dir() {
                continue;
            }

            if let Err(e) = self.scan_camera_dir(&camera_dir, now, &mut segments) {
                warn!(
                    path = %camera_dir.display(),
                    error = %e,
                    "Skipping unreadable camera directory"
                );
            }
        }

        segments.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(
            root = %self.root.display(),
            completed = segments.len(),
            "Scan finished"
        );

        Ok(segments)
    }

    /// Collect completed segments from one camera directory. Per-file stat
    /// failures skip that file; failing to list the directory is returned.
    fn scan_camera_dir(
        &self,
        camera_dir: &Path,
        now: SystemTime,
        segments: &mut Vec<Segment>,
    ) -> io::Result<()> {
        for entry in fs::read_dir(camera_dir)? {
            let path = entry?.path();

            if path.extension() != Some(OsStr::new(&self.extension)) {
                continue;
            }

            let modified = match fs::metadata(&path) {
                Ok(metadata) if !metadata.is_file() => continue,
                Ok(metadata) => metadata.modified(),
                Err(e) => Err(e),
            };

            let modified = match modified {
                Ok(modified) => modified,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    trace!(path = %path.display(), "Segment vanished during scan");
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat segment, skipping");
                    continue;
                }
            };

            if !self.is_complete(modified, now) {
                trace!(path = %path.display(), "Segment still recording");
                continue;
            }

            if let Some(segment) = Segment::new(path) {
                segments.push(segment);
            }
        }

        Ok(())
    }

    /// A segment is complete once strictly older than the threshold.
    /// Modification times in the future are never complete.
    fn is_complete(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .map(|age| age > self.threshold)
            .unwrap_or(false)
    }
}
