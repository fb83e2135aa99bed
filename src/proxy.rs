//! Zero-Memory Streaming Proxy (ZMP) — streams a request body straight into
//! the object store through a bounded in-process pipe, never holding more
//! than one window's worth of bytes in memory at a time (spec.md §4.6).

use crate::error::AppError;
use crate::storage::{PutOutcome, StorageBackend};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Size of the bounded pipe between the request-body reader task and the
/// store-writer task: at most this many bytes are in flight at once,
/// regardless of the object's total size.
const WINDOW_BYTES: usize = 32 * 1024;

/// Where `presign_proxy_url` points clients back at this service instead of
/// the object store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProxyUrl {
    pub url: String,
    pub available_slots: usize,
    pub recommended_delay_ms: u64,
}

/// Global concurrency gate for proxied uploads, plus the bookkeeping
/// `presign_proxy_url` needs to advertise capacity to callers.
pub struct StreamingProxy {
    backend: Arc<dyn StorageBackend>,
    slots: Arc<tokio::sync::Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    base_url: String,
}

impl StreamingProxy {
    pub fn new(backend: Arc<dyn StorageBackend>, capacity: usize, base_url: String) -> Self {
        Self {
            backend,
            slots: Arc::new(tokio::sync::Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            base_url,
        }
    }

    pub fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight.load(Ordering::Relaxed))
    }

    /// Absolute URL the service advertises for clients that cannot reach the
    /// object store directly. Does not reserve a slot; `proxy` does that at
    /// upload time.
    pub fn presign_proxy_url(&self, filename: &str) -> ProxyUrl {
        ProxyUrl {
            url: format!("{}/upload/zero-memory-proxy?filename={}", self.base_url, urlencode(filename)),
            available_slots: self.available_slots(),
            recommended_delay_ms: if self.available_slots() == 0 { 500 } else { 0 },
        }
    }

    /// Proxy `body` straight into the object store under `filename`.
    ///
    /// Waits (cooperatively, no internal queue beyond the semaphore itself)
    /// for a concurrency slot, rejects duplicates, then runs a reader task
    /// (body -> pipe) and a writer task (pipe -> `OSA.stream_put`)
    /// concurrently joined by `tokio::try_join!`. Dropping the returned
    /// future (client cancellation) drops the unacquired or held permit,
    /// releasing the slot either way.
    #[instrument(skip(self, body))]
    pub async fn proxy<S>(&self, filename: &str, body: S) -> Result<PutOutcome, AppError>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin + 'static,
    {
        let permit = self.slots.clone().acquire_owned().await.map_err(|_| {
            AppError::InvariantViolation("proxy concurrency semaphore closed".to_string())
        })?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let _guard = InFlightGuard { counter: &self.in_flight };

        if self.backend.exists(filename).await? {
            return Err(AppError::Duplicate { filename: filename.to_string() });
        }

        let (pipe_writer, pipe_reader) = tokio::io::duplex(WINDOW_BYTES);
        let cancel = CancellationToken::new();

        let reader_task = read_body_into_pipe(body, pipe_writer, cancel.clone());
        let writer_task = write_pipe_to_store(self.backend.clone(), filename.to_string(), pipe_reader, cancel.clone());

        let (_, outcome) = tokio::try_join!(reader_task, writer_task)?;

        drop(permit);
        info!(filename, size = outcome.size, "streaming proxy upload completed");
        Ok(outcome)
    }
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn read_body_into_pipe<S>(mut body: S, mut writer: DuplexStream, cancel: CancellationToken) -> Result<(), AppError>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AppError::InvariantViolation("proxy aborted by peer task".to_string()));
            }
            chunk = body.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        if writer.write_all(&bytes).await.is_err() {
                            cancel.cancel();
                            return Err(AppError::InvariantViolation("pipe closed while writing request body".to_string()));
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "reading request body failed");
                        cancel.cancel();
                        return Err(AppError::ClientInput(format!("failed reading upload body: {e}")));
                    }
                    None => {
                        let _ = writer.shutdown().await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn write_pipe_to_store(
    backend: Arc<dyn StorageBackend>,
    filename: String,
    reader: DuplexStream,
    cancel: CancellationToken,
) -> Result<PutOutcome, AppError> {
    let stream: BoxStream<'static, Result<Bytes, std::io::Error>> = ReaderStream::new(reader).boxed();
    let result = backend.stream_put(&filename, stream).await;
    if result.is_err() {
        cancel.cancel();
    }
    Ok(result?)
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
