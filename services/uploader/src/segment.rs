//! Recorded segments and their remote object keys.

use chrono::{DateTime, Datelike, Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One recorded video time slice on local disk.
///
/// Identity for upload purposes is `(camera, filename)`; the camera is the
/// name of the directory the recorder wrote the file into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    pub camera: String,
    pub filename: String,
}

impl Segment {
    /// Build a segment from its path.
    ///
    /// Returns `None` when the path has no parent directory name or file name
    /// that can be represented as UTF-8.
    pub fn new(path: PathBuf) -> Option<Self> {
        let camera = camera_of(&path)?.to_string();
        let filename = path.file_name()?.to_str()?.to_string();

        Some(Self {
            path,
            camera,
            filename,
        })
    }

    /// Remote key for this segment when its modification time is `modified`.
    pub fn object_key(&self, modified: SystemTime) -> String {
        object_key(&self.camera, &self.filename, capture_date(modified))
    }
}

/// Name of the camera directory containing `path`.
pub fn camera_of(path: &Path) -> Option<&str> {
    path.parent()?.file_name()?.to_str()
}

/// Local calendar date of a modification time.
pub fn capture_date(modified: SystemTime) -> NaiveDate {
    DateTime::<Local>::from(modified).date_naive()
}

/// Build the object key `{camera}/{YYYY}/{MM}/{DD}/{filename}`.
///
/// The date is the segment's modification date, never a date parsed from the
/// filename, so the key can disagree with a timestamp embedded in the name.
pub fn object_key(camera: &str, filename: &str, date: NaiveDate) -> String {
    format!(
        "{camera}/{year:04}/{month:02}/{day:02}/{filename}",
        camera = camera,
        year = date.year(),
        month = date.month(),
        day = date.day(),
        filename = filename
    )
}

/// Content type for a segment file extension.
pub fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("ts") => "video/mp2t",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}
