//! Sequential batch conversion
//!
//! Files are converted one after another in input order. A failed file is
//! logged and recorded, and the batch moves on; only cancellation stops it
//! early. Aggregate progress is `(completed + current) / total` and never
//! decreases.

use crate::error::ConvertError;
use crate::pipeline::{ConversionOutcome, ConversionRequest, ProgressObserver};
use crate::service::AudioExtractor;
use chrono::Utc;
use parrot_common::ConversionEvent;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// A file of the batch that did not convert
#[derive(Debug)]
pub struct BatchFailure {
    pub source_path: PathBuf,
    pub error: ConvertError,
}

/// Result of a batch run
#[derive(Debug)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Outputs of successful conversions, in input order
    pub produced: Vec<PathBuf>,
    pub failures: Vec<BatchFailure>,
    /// Stopped by cancellation before the last file finished
    pub cancelled: bool,
}

impl BatchReport {
    fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            produced: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }
}

/// Forwards only values above the last one forwarded
struct MonotonicProgress {
    last: Mutex<f64>,
    inner: Arc<dyn ProgressObserver>,
}

impl MonotonicProgress {
    fn report(&self, progress: f64) {
        let progress = progress.clamp(0.0, 1.0);
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if progress > *last {
            *last = progress;
            self.inner.on_progress(progress);
        }
    }
}

/// Maps one file's progress into the batch range
struct FileProgress {
    tracker: Arc<MonotonicProgress>,
    completed: usize,
    total: usize,
}

impl ProgressObserver for FileProgress {
    fn on_progress(&self, progress: f64) {
        self.tracker
            .report((self.completed as f64 + progress) / self.total as f64);
    }
}

pub struct BatchConverter {
    extractor: AudioExtractor,
}

impl BatchConverter {
    pub fn new(extractor: AudioExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &AudioExtractor {
        &self.extractor
    }

    /// Convert every request in order
    ///
    /// Outputs go to `output_dir/<stem>.<ext>` when a directory is given,
    /// otherwise to each request's own target.
    pub async fn convert_all(
        &self,
        requests: Vec<ConversionRequest>,
        output_dir: Option<&Path>,
        observer: Arc<dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let mut report = BatchReport::new(batch_id);
        let total = requests.len();
        if total == 0 {
            self.finish(&report);
            return report;
        }

        if let Some(dir) = output_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to create output directory");
            }
        }

        info!(batch_id = %batch_id, files = total, "Starting batch conversion");
        let tracker = Arc::new(MonotonicProgress {
            last: Mutex::new(0.0),
            inner: observer,
        });
        let extension = self.extractor.config().output_extension.clone();

        for (completed, request) in requests.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let request = match output_dir {
                Some(dir) if request.target_path.is_none() => {
                    let target = request.target_in(dir, &extension);
                    request.with_target(target)
                }
                _ => request,
            };
            let source_path = request.source_path.clone();
            let file_observer = Arc::new(FileProgress {
                tracker: Arc::clone(&tracker),
                completed,
                total,
            });

            match self
                .extractor
                .convert(request, file_observer, cancel.clone())
                .await
            {
                Ok(ConversionOutcome::Completed(path)) => report.produced.push(path),
                Ok(ConversionOutcome::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(error) => {
                    warn!(
                        source = %source_path.display(),
                        error = %error,
                        "Conversion failed, continuing with next file"
                    );
                    report.failures.push(BatchFailure { source_path, error });
                }
            }

            let done = completed + 1;
            tracker.report(done as f64 / total as f64);
            self.extractor
                .events()
                .emit_lossy(ConversionEvent::BatchProgress {
                    batch_id,
                    completed: done,
                    total,
                    progress: done as f64 / total as f64,
                    timestamp: Utc::now(),
                });

            if cancel.is_cancelled() {
                report.cancelled = done < total;
                break;
            }
        }

        info!(
            batch_id = %batch_id,
            produced = report.produced.len(),
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "Batch conversion finished"
        );
        self.finish(&report);
        report
    }

    fn finish(&self, report: &BatchReport) {
        self.extractor
            .events()
            .emit_lossy(ConversionEvent::BatchFinished {
                batch_id: report.batch_id,
                produced: report.produced.len(),
                failed: report.failures.len(),
                cancelled: report.cancelled,
                timestamp: Utc::now(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;

    fn recorder() -> (Arc<Mutex<Vec<f64>>>, Arc<dyn ProgressObserver>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |p: f64| sink.lock().unwrap().push(p));
        (seen, observer)
    }

    #[test]
    fn test_monotonic_progress_drops_regressions() {
        let (seen, observer) = recorder();
        let tracker = MonotonicProgress {
            last: Mutex::new(0.0),
            inner: observer,
        };
        for p in [0.1, 0.3, 0.2, 0.3, 1.5] {
            tracker.report(p);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0.1, 0.3, 1.0]);
    }

    #[test]
    fn test_file_progress_scales_into_batch_range() {
        let (seen, observer) = recorder();
        let tracker = Arc::new(MonotonicProgress {
            last: Mutex::new(0.0),
            inner: observer,
        });
        let file = FileProgress {
            tracker,
            completed: 1,
            total: 4,
        };
        file.on_progress(0.5);
        file.on_progress(1.0);
        assert_eq!(*seen.lock().unwrap(), vec![0.375, 0.5]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (seen, observer) = recorder();
        let batch = BatchConverter::new(AudioExtractor::new(ExtractorConfig::default()).unwrap());
        let report = batch
            .convert_all(Vec::new(), None, observer, &CancellationToken::new())
            .await;
        assert!(report.produced.is_empty());
        assert!(report.failures.is_empty());
        assert!(!report.cancelled);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_file() {
        let (seen, observer) = recorder();
        let batch = BatchConverter::new(AudioExtractor::new(ExtractorConfig::default()).unwrap());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = batch
            .convert_all(
                vec![ConversionRequest::new("/nonexistent/a.mp4")],
                None,
                observer,
                &cancel,
            )
            .await;
        assert!(report.cancelled);
        assert!(report.failures.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_batch() {
        let (seen, observer) = recorder();
        let batch = BatchConverter::new(AudioExtractor::new(ExtractorConfig::default()).unwrap());
        let report = batch
            .convert_all(
                vec![
                    ConversionRequest::new("/nonexistent/a.mp4"),
                    ConversionRequest::new("/nonexistent/b.mp4"),
                ],
                None,
                observer,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[0].error, ConvertError::NotFound(_)));
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);
    }
}
