//! Cambackup Segment Uploader
//!
//! Backs up RTSP camera footage recorded by an external recorder. The recorder
//! writes one file per time segment into `{local_path}/{camera}/`; this service
//! finds segments that have stopped growing, uploads them to an S3-compatible
//! bucket and removes the local copy once the store has acknowledged it.
//!
//! ## Features
//!
//! - **Age-based completeness**: a segment is uploaded once its modification
//!   time is more than five minutes old
//! - **Deterministic keys**: `{camera}/{YYYY}/{MM}/{DD}/{filename}`, dated by
//!   modification time, so a retried upload overwrites the same object
//! - **Safe cleanup**: local deletion only after a confirmed upload
//! - **Failure isolation**: failed segments stay on disk and are retried on the
//!   next cycle; a failed cycle backs off and tries again
//!
//! ## Architecture
//!
//! ```text
//! Recorder (external)         Uploader                         S3 Bucket
//! ┌──────────────┐           ┌──────────────┐                ┌──────────────┐
//! │ {camera}/    │           │ Segment      │                │ {camera}/    │
//! │   *.mp4      │──────────▶│ Scanner      │                │   {Y}/{M}/   │
//! └──────────────┘           └──────────────┘                │   {D}/       │
//!                                   │                        └──────────────┘
//!                                   ▼                               ▲
//!                            ┌──────────────┐                ┌──────────────┐
//!                            │ Upload       │───────────────▶│ S3           │
//!                            │ Coordinator  │                │ Uploader     │
//!                            └──────────────┘                └──────────────┘
//!                                   ▲
//!                            ┌──────────────┐
//!                            │ Poll Loop    │
//!                            └──────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod poll_loop;
pub mod s3_uploader;
pub mod scanner;
pub mod segment;
pub mod store;

pub use config::Config;
pub use coordinator::{Cleanup, UploadCoordinator, UploadOutcome};
pub use poll_loop::{CycleReport, PollLoop, PollSettings, ERROR_BACKOFF};
pub use s3_uploader::S3Uploader;
pub use scanner::{ScanError, SegmentScanner, COMPLETENESS_THRESHOLD};
pub use segment::{object_key, Segment};
pub use store::{ObjectStore, StoreError};
