//! Batch Completion (BC) — finalizes N uploads as a single logical batch,
//! tallying outcomes and gating batch-vs-per-file notification emission
//! (spec.md §4.8).

use crate::completion::CompletionPipeline;
use crate::error::AppError;
use crate::notify::{NotificationSink, UploadNotification};
use crate::types::{BatchContext, CompletionRecord, UploadMethod};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// One filename's outcome within a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Success { record: CompletionRecord },
    Duplicate,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub success: bool,
    pub success_count: u32,
    pub duplicate_count: u32,
    pub error_count: u32,
    pub results: Vec<(String, BatchItemOutcome)>,
}

pub struct BatchCompleter {
    cp: Arc<CompletionPipeline>,
    sink: Arc<dyn NotificationSink>,
    batch_threshold: usize,
}

impl BatchCompleter {
    pub fn new(cp: Arc<CompletionPipeline>, sink: Arc<dyn NotificationSink>, batch_threshold: usize) -> Self {
        Self { cp, sink, batch_threshold }
    }

    /// `items` are `(filename, declared_size, etag, upload_method)` tuples
    /// already known to the caller (each has already gone through
    /// ROUTE/PUC/MSM/ZMP individually; BC only finalizes them).
    #[instrument(skip(self, items))]
    pub async fn complete_batch(&self, items: Vec<(String, u64, Option<String>, UploadMethod)>) -> BatchResult {
        let mut ctx = BatchContext::new(items.iter().map(|(f, ..)| f.clone()).collect());
        let is_batch = ctx.is_batch(self.batch_threshold);

        if is_batch {
            self.emit_or_log(UploadNotification::BatchStarted { filenames: ctx.filenames.clone() }).await;
        }

        let mut results = Vec::with_capacity(items.len());
        for (filename, declared_size, etag, upload_method) in items {
            match self.cp.complete(&filename, declared_size, etag, upload_method).await {
                Ok(record) => {
                    ctx.success_count += 1;
                    if is_batch {
                        results.push((filename, BatchItemOutcome::Success { record }));
                    } else {
                        self.emit_or_log(UploadNotification::Completed(record.clone())).await;
                        results.push((filename, BatchItemOutcome::Success { record }));
                    }
                }
                Err(AppError::Duplicate { filename: dup }) => {
                    ctx.duplicate_count += 1;
                    results.push((dup, BatchItemOutcome::Duplicate));
                }
                Err(e) => {
                    ctx.error_count += 1;
                    results.push((filename, BatchItemOutcome::Error { message: e.to_string() }));
                }
            }
        }

        if is_batch {
            self.emit_or_log(UploadNotification::BatchCompleted {
                success_count: ctx.success_count,
                duplicate_count: ctx.duplicate_count,
                error_count: ctx.error_count,
            })
            .await;
        }

        BatchResult {
            success: ctx.error_count == 0,
            success_count: ctx.success_count,
            duplicate_count: ctx.duplicate_count,
            error_count: ctx.error_count,
            results,
        }
    }

    /// Notification delivery never fails the HTTP response (spec.md §4.8):
    /// a batch-event failure here would ideally fall back to per-file
    /// emission, but `LoggingSink`/any reasonable `NotificationSink`
    /// cannot itself fail (the trait's `notify` is infallible); this
    /// wrapper exists as the single place that decision is made if a
    /// future fallible sink is introduced.
    async fn emit_or_log(&self, event: UploadNotification) {
        self.sink.notify(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LoggingSink;
    use crate::storage::fake::FakeBackend;

    fn completer(batch_threshold: usize) -> (BatchCompleter, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new());
        let cp = Arc::new(CompletionPipeline::new(backend.clone()));
        (BatchCompleter::new(cp, Arc::new(LoggingSink), batch_threshold), backend)
    }

    #[tokio::test]
    async fn single_item_is_not_batch_notified_but_still_succeeds() {
        let (bc, backend) = completer(2);
        backend.seed("a.wav", "data");

        let result = bc.complete_batch(vec![("a.wav".into(), 4, None, UploadMethod::DirectObjectStore)]).await;
        assert_eq!(result.success_count, 1);
        assert!(result.success);
    }

    #[tokio::test]
    async fn tallies_success_duplicate_and_error() {
        let (bc, backend) = completer(2);
        backend.seed("ok.wav", "data");

        let items = vec![
            ("ok.wav".to_string(), 4, None, UploadMethod::DirectObjectStore),
            ("missing.wav".to_string(), 4, None, UploadMethod::DirectObjectStore),
        ];
        let result = bc.complete_batch(items).await;

        assert_eq!(result.success_count, 1);
        assert_eq!(result.error_count, 1);
        assert!(!result.success);
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn repeated_filename_in_a_batch_tallies_as_duplicate() {
        let (bc, backend) = completer(2);
        backend.seed("a.wav", "data");
        backend.seed("b.wav", "data");

        let items = vec![
            ("a.wav".to_string(), 4, None, UploadMethod::DirectObjectStore),
            ("b.wav".to_string(), 4, None, UploadMethod::DirectObjectStore),
            ("a.wav".to_string(), 4, None, UploadMethod::DirectObjectStore),
        ];
        let result = bc.complete_batch(items).await;

        assert_eq!(result.success_count, 2);
        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn batch_of_two_meets_threshold() {
        let (bc, backend) = completer(2);
        backend.seed("a.wav", "data");
        backend.seed("b.wav", "data");

        let items = vec![
            ("a.wav".to_string(), 4, None, UploadMethod::DirectObjectStore),
            ("b.wav".to_string(), 4, None, UploadMethod::DirectObjectStore),
        ];
        let result = bc.complete_batch(items).await;
        assert_eq!(result.success_count, 2);
        assert!(result.success);
    }
}
