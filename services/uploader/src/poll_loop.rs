//! Drives scan-and-upload cycles until shutdown.

use crate::coordinator::{Cleanup, UploadCoordinator, UploadOutcome};
use crate::scanner::{ScanError, SegmentScanner};
use crate::store::ObjectStore;
use futures::future;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sleep after a cycle fails before trying the whole cycle again.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Tallies for one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub deleted: usize,
    /// Uploaded but the local file could not be removed
    pub delete_failed: usize,
    /// Never attempted because shutdown was requested mid-cycle
    pub skipped: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded { cleanup, .. } => {
                self.uploaded += 1;
                match cleanup {
                    Cleanup::Deleted => self.deleted += 1,
                    Cleanup::DeleteFailed(_) => self.delete_failed += 1,
                    Cleanup::Retained => {}
                }
            }
            UploadOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Scheduling parameters for [`PollLoop`]
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub error_backoff: Duration,
    /// Maximum segments in flight per cycle; 1 uploads strictly in order
    pub concurrency: usize,
}

pub struct PollLoop<S> {
    scanner: SegmentScanner,
    coordinator: UploadCoordinator<S>,
    settings: PollSettings,
}

impl<S: ObjectStore> PollLoop<S> {
    pub fn new(
        scanner: SegmentScanner,
        coordinator: UploadCoordinator<S>,
        settings: PollSettings,
    ) -> Self {
        Self {
            scanner,
            coordinator,
            settings,
        }
    }

    /// Scan once and attempt every completed segment.
    ///
    /// Per-segment failures are counted in the report; only a failed scan
    /// makes the cycle itself fail.
    pub async fn run_cycle(&self) -> Result<CycleReport, ScanError> {
        self.run_cycle_until(&CancellationToken::new()).await
    }

    /// Like [`run_cycle`](Self::run_cycle), but stops starting new uploads
    /// once `shutdown` is cancelled. Uploads already in flight still finish.
    pub async fn run_cycle_until(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<CycleReport, ScanError> {
        let segments = self.scanner.find_completed_segments()?;

        let mut report = CycleReport {
            discovered: segments.len(),
            ..Default::default()
        };

        // Scanned paths are unique, so no two uploads share a local file.
        let outcomes: Vec<UploadOutcome> = stream::iter(segments.iter())
            .take_while(|_| future::ready(!shutdown.is_cancelled()))
            .map(|segment| self.coordinator.upload_file(segment))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }
        report.skipped = report.discovered - outcomes.len();

        if report.skipped > 0 {
            warn!(
                skipped = report.skipped,
                "Shutdown requested, leaving remaining segments for next start"
            );
        }

        if report.discovered > 0 {
            info!(
                discovered = report.discovered,
                uploaded = report.uploaded,
                failed = report.failed,
                deleted = report.deleted,
                delete_failed = report.delete_failed,
                "Processed {} segments",
                report.discovered
            );
        }

        Ok(report)
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between segments and while sleeping, never
    /// mid-upload: an upload in progress always finishes (or fails) first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            root = %self.scanner.root().display(),
            interval_secs = self.settings.interval.as_secs(),
            concurrency = self.settings.concurrency,
            "Starting segment uploader"
        );

        while !shutdown.is_cancelled() {
            let delay = match self.run_cycle_until(&shutdown).await {
                Ok(_) => {
                    metrics::counter!("uploader.cycles.completed").increment(1);
                    self.settings.interval
                }
                Err(e) => {
                    metrics::counter!("uploader.cycles.failed").increment(1);
                    error!(
                        error = %e,
                        backoff_secs = self.settings.error_backoff.as_secs(),
                        "Error in upload loop"
                    );
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        warn!("Uploader stopped");
    }
}
