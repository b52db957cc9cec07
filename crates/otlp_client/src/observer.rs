//! Self-observability for uploads.
//!
//! The client reports every finished upload to an [`UploadObserver`]. The
//! observer sees the result but cannot change it.

use crate::error::ExportError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Summary of one finished upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadReport<'a> {
    /// Records submitted in the batch.
    pub submitted: u64,
    /// Records the collector ultimately accepted.
    pub succeeded: u64,
    /// Wall time from submission to the final result, retries included.
    pub duration: Duration,
    /// The terminal error, if the upload failed.
    pub error: Option<&'a ExportError>,
}

impl UploadReport<'_> {
    pub fn failed(&self) -> u64 {
        self.submitted.saturating_sub(self.succeeded)
    }
}

/// Receives a report for every finished upload.
pub trait UploadObserver: Send + Sync {
    fn upload_finished(&self, report: &UploadReport<'_>);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {
    fn upload_finished(&self, _report: &UploadReport<'_>) {}
}

/// Upper bounds (inclusive) of the duration histogram buckets, in milliseconds.
pub const DURATION_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1_000, 5_000, 10_000];

/// Thread-safe upload counters and a duration histogram.
///
/// The last histogram bucket counts everything above the largest bound.
#[derive(Debug, Default)]
pub struct UploadMetrics {
    uploads: AtomicU64,
    upload_errors: AtomicU64,
    records_submitted: AtomicU64,
    records_succeeded: AtomicU64,
    records_failed: AtomicU64,
    partial_successes: AtomicU64,
    duration_buckets: [AtomicU64; DURATION_BUCKETS_MS.len() + 1],
}

impl UploadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    pub fn upload_errors(&self) -> u64 {
        self.upload_errors.load(Ordering::Relaxed)
    }

    pub fn records_submitted(&self) -> u64 {
        self.records_submitted.load(Ordering::Relaxed)
    }

    pub fn records_succeeded(&self) -> u64 {
        self.records_succeeded.load(Ordering::Relaxed)
    }

    pub fn records_failed(&self) -> u64 {
        self.records_failed.load(Ordering::Relaxed)
    }

    pub fn partial_successes(&self) -> u64 {
        self.partial_successes.load(Ordering::Relaxed)
    }

    /// Snapshot of bucket counts; index `i` pairs with `DURATION_BUCKETS_MS[i]`.
    pub fn duration_histogram(&self) -> Vec<u64> {
        self.duration_buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    fn bucket_index(duration: Duration) -> usize {
        let ms = duration.as_millis();
        DURATION_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= u128::from(bound))
            .unwrap_or(DURATION_BUCKETS_MS.len())
    }
}

impl UploadObserver for UploadMetrics {
    fn upload_finished(&self, report: &UploadReport<'_>) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.records_submitted
            .fetch_add(report.submitted, Ordering::Relaxed);
        self.records_succeeded
            .fetch_add(report.succeeded, Ordering::Relaxed);
        self.records_failed.fetch_add(report.failed(), Ordering::Relaxed);

        if let Some(err) = report.error {
            self.upload_errors.fetch_add(1, Ordering::Relaxed);
            if err.is_partial_success() {
                self.partial_successes.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.duration_buckets[Self::bucket_index(report.duration)].fetch_add(1, Ordering::Relaxed);
    }
}
