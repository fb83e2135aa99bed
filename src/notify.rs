//! Notification fan-out for upload lifecycle events. Pluggable backend
//! behind a trait object, the way the teacher keeps its engine behind a
//! trait-object-shaped `AppState` field instead of hardwiring one
//! implementation (spec.md §4.7's "notification fan-out").

use crate::types::CompletionRecord;
use async_trait::async_trait;
use tracing::info;

/// One upload-lifecycle event CP/BC may emit.
#[derive(Debug, Clone)]
pub enum UploadNotification {
    Completed(CompletionRecord),
    BatchStarted { filenames: Vec<String> },
    BatchCompleted { success_count: u32, duplicate_count: u32, error_count: u32 },
}

/// A destination for upload notifications. Implementations must not panic
/// or block the caller's request path; failures are logged by the caller,
/// never propagated to the HTTP client (spec.md §4.8: "must not fail the
/// HTTP response").
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: UploadNotification);
}

/// Default sink: structured log line per event. Stands in for whatever
/// external notification channel (webhook, message queue) a deployment
/// wires up; this crate defines the trait, not a specific downstream
/// integration (Discord-specific formatting is explicitly out of scope).
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, event: UploadNotification) {
        match event {
            UploadNotification::Completed(record) => {
                info!(filename = %record.filename, size = record.size, upload_method = record.upload_method.as_str(), "upload completed");
            }
            UploadNotification::BatchStarted { filenames } => {
                info!(count = filenames.len(), "batch upload started");
            }
            UploadNotification::BatchCompleted { success_count, duplicate_count, error_count } => {
                info!(success_count, duplicate_count, error_count, "batch upload completed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BasicMetadata, UploadMethod};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<UploadNotification>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, event: UploadNotification) {
            self.events.lock().push(event);
        }
    }

    #[tokio::test]
    async fn logging_sink_does_not_panic_on_any_event() {
        let sink = LoggingSink;
        sink.notify(UploadNotification::BatchStarted { filenames: vec!["a.wav".into()] }).await;
        sink.notify(UploadNotification::BatchCompleted { success_count: 1, duplicate_count: 0, error_count: 0 }).await;
    }

    #[tokio::test]
    async fn recording_sink_captures_events_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let record = CompletionRecord {
            filename: "a.wav".into(),
            size: 10,
            etag: None,
            upload_method: UploadMethod::DirectObjectStore,
            completed_at: Utc::now(),
            basic_metadata: BasicMetadata { filename: "a.wav".into(), file_size: 10, upload_time: Utc::now(), is_valid: true },
        };
        sink.notify(UploadNotification::Completed(record)).await;
        sink.notify(UploadNotification::BatchStarted { filenames: vec!["a.wav".into()] }).await;
        assert_eq!(sink.events.lock().len(), 2);
    }
}
