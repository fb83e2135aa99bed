//! Object-Store Adapter (OSA) trait definitions.

use crate::types::EndpointVariant;
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for object-store operations (spec.md §7 `StoreError`
/// family). Every variant here maps to exactly one `AppError` projection in
/// `crate::error`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store unreachable: {0}")]
    Unreachable(String),

    #[error("object store rejected credentials: {0}")]
    AuthRejected(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("object store quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Transient failure that the retry policy in `storage::retry` may
    /// recover from (spec.md §7, §9: retries confined to OSA).
    #[error("transient object store error: {0}")]
    Transient(String),

    /// Non-retryable failure distinct from the more specific variants above.
    #[error("object store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            StoreError::AuthRejected(_) => StatusCode::BAD_GATEWAY,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            StoreError::QuotaExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
            StoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::Permanent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether `storage::retry::with_backoff` should retry this failure
    /// (spec.md §7: only `Transient` errors are retried, and only inside
    /// OSA).
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// One part already uploaded in an in-flight multipart session, as returned
/// by `upload_id` bookkeeping callers (the HTTP layer / MSM) when asking OSA
/// to complete or abort.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Outcome of `initiate_multipart`.
#[derive(Debug, Clone)]
pub struct MultipartHandle {
    pub upload_id: String,
}

/// Outcome of `put_part`.
#[derive(Debug, Clone)]
pub struct PartOutcome {
    pub etag: String,
    pub size: u64,
}

/// Outcome of `complete_multipart`/`stream_put`.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub etag: Option<String>,
    pub size: u64,
}

/// Abstract adapter over an S3-compatible object store (spec.md §4.1). Two
/// endpoint variants (internal/public) are realized by the concrete
/// implementation holding two independently configured clients; callers
/// select which one to target per-call via `EndpointVariant`.
///
/// This trait is object-safe and used behind `Arc<dyn StorageBackend>`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// `HEAD`-equivalent existence check, used for duplicate detection.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Issue a presigned `PUT` URL against the given endpoint variant, valid
    /// for `ttl` (already bounded to [1min, 24h] by the caller).
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        endpoint: EndpointVariant,
    ) -> Result<String, StoreError>;

    /// Begin a multipart session. Implementations choose `Native` (the
    /// store's own multipart API) or `ComposeSideObjects` internally,
    /// presenting the same interface to MSM either way (spec.md §4.1).
    async fn initiate_multipart(&self, key: &str) -> Result<MultipartHandle, StoreError>;

    /// Presign a single part's PUT, so the client can upload it directly
    /// without proxying bytes through this service.
    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
        endpoint: EndpointVariant,
    ) -> Result<String, StoreError>;

    /// Upload a single part's bytes.
    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartOutcome, StoreError>;

    /// Finalize a multipart session from the given (ordered) completed
    /// parts.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<PutOutcome, StoreError>;

    /// Abort a multipart session, releasing any store-side resources
    /// (including best-effort deletion of `ComposeSideObjects` side
    /// objects).
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError>;

    /// Stream a body of unknown-in-advance length straight into the store
    /// without buffering the whole object in memory (ZMP's backing write).
    async fn stream_put(
        &self,
        key: &str,
        body: BoxStream<'static, Result<Bytes, std::io::Error>>,
    ) -> Result<PutOutcome, StoreError>;

    /// Persist a small JSON metadata sidecar alongside an object (CP's
    /// basic/enriched metadata, spec.md §4.7).
    async fn write_metadata(&self, key: &str, json: &[u8]) -> Result<(), StoreError>;

    /// Read at most `max_bytes` from the start of an object. CP's
    /// enrichment tail uses this to sniff a format signature and, for
    /// formats whose duration is derivable from a fixed-size header (e.g.
    /// WAV), compute it without downloading the whole object.
    async fn read_prefix(&self, key: &str, max_bytes: u64) -> Result<Bytes, StoreError>;
}
