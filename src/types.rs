//! Core data model for the upload coordination, streaming, and multipart
//! session subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum chunk size accepted for a multipart part: 5 MiB.
pub const MIN_CHUNK_BYTES: u64 = 5 * 1024 * 1024;

/// Which object-store endpoint a presigned URL (or proxy target) is issued
/// against. `Internal` may only be reachable from the service's own network;
/// `Public` must be reachable by browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointVariant {
    Internal,
    Public,
}

/// How a given upload was finalized. Mirrors the enum in spec §3
/// (`CompletionRecord.upload_method`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    PresignedCloudflare,
    DirectObjectStore,
    MultipartCompose,
    StreamingProxy,
    MultipartProxy,
}

impl UploadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMethod::PresignedCloudflare => "presigned_cloudflare",
            UploadMethod::DirectObjectStore => "direct_object_store",
            UploadMethod::MultipartCompose => "multipart_compose",
            UploadMethod::StreamingProxy => "streaming_proxy",
            UploadMethod::MultipartProxy => "multipart_proxy",
        }
    }
}

/// Lifecycle state of an `UploadSession`. Terminal states never transition
/// back (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Aborted,
}

/// A single registered part of a multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// `UploadSession` — MSM-owned. See spec §3 for the full invariant list:
/// part_number space is `1..=total_parts`, no duplicate part numbers, a
/// session in `completed`/`aborted` never transitions back, `last_activity
/// >= created_at`, and on completion `uploaded_parts` covers every part
/// number in `1..=total_parts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub filename: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_parts: u32,
    /// Keyed by part_number; a retry of part N replaces the previous record.
    pub uploaded_parts: std::collections::BTreeMap<u32, PartRecord>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub file_hash: String,
    pub status: SessionStatus,
}

impl UploadSession {
    pub fn new(upload_id: String, filename: String, file_size: u64, chunk_size: u64, file_hash: String) -> Self {
        let total_parts = Self::total_parts(file_size, chunk_size);
        let now = Utc::now();
        Self {
            upload_id,
            filename,
            file_size,
            chunk_size,
            total_parts,
            uploaded_parts: std::collections::BTreeMap::new(),
            created_at: now,
            last_activity: now,
            file_hash,
            status: SessionStatus::Active,
        }
    }

    pub fn total_parts(file_size: u64, chunk_size: u64) -> u32 {
        debug_assert!(chunk_size > 0);
        (file_size.div_ceil(chunk_size)) as u32
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Register or replace a part. Idempotent on retries of the same
    /// `(part_number, etag)` pair; a retry with a new etag replaces the
    /// previous record for that part number (spec §4.5, §5).
    pub fn register_part(&mut self, part_number: u32, etag: String, size: u64) {
        self.uploaded_parts.insert(
            part_number,
            PartRecord {
                part_number,
                etag,
                size,
                uploaded_at: Utc::now(),
            },
        );
        self.touch();
    }

    /// Part numbers in `1..=total_parts` that have not been registered.
    pub fn missing_parts(&self) -> Vec<u32> {
        (1..=self.total_parts)
            .filter(|n| !self.uploaded_parts.contains_key(n))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_parts().is_empty()
    }

    pub fn is_stale(&self, timeout: chrono::Duration) -> bool {
        self.status == SessionStatus::Active && Utc::now() - self.last_activity > timeout
    }

    /// Parts ordered ascending by part number, most recent etag per number.
    pub fn parts_ascending(&self) -> Vec<PartRecord> {
        self.uploaded_parts.values().cloned().collect()
    }
}

/// `UploadIntent` — PUC-owned, transient. Created on presigned-URL issuance.
#[derive(Debug, Clone)]
pub struct UploadIntent {
    pub filename: String,
    pub file_size: u64,
    pub expires_at: DateTime<Utc>,
}

/// `CompletionRecord` — CP-owned, transient. Emitted exactly once per
/// upload and fed into CP's async metadata extractor.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRecord {
    pub filename: String,
    pub size: u64,
    pub etag: Option<String>,
    pub upload_method: UploadMethod,
    pub completed_at: DateTime<Utc>,
    pub basic_metadata: BasicMetadata,
}

/// The synchronous outcome summary returned to the client by CP (spec §4.7
/// step 3), before any asynchronous enrichment happens.
#[derive(Debug, Clone, Serialize)]
pub struct BasicMetadata {
    pub filename: String,
    pub file_size: u64,
    pub upload_time: DateTime<Utc>,
    pub is_valid: bool,
}

/// Richer metadata produced by CP's async enrichment tail. Never guaranteed
/// to exist by the time a client re-reads the object (spec §4.7 ordering
/// guarantee).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedMetadata {
    pub filename: String,
    pub format: Option<String>,
    pub duration_seconds: Option<f64>,
    pub content_hash: Option<String>,
    pub processing_duration_ms: u64,
}

/// `BatchContext` — BC-owned, transient.
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    pub filenames: Vec<String>,
    pub success_count: u32,
    pub duplicate_count: u32,
    pub error_count: u32,
}

impl BatchContext {
    pub fn new(filenames: Vec<String>) -> Self {
        Self {
            filenames,
            success_count: 0,
            duplicate_count: 0,
            error_count: 0,
        }
    }

    /// A batch is "batch-notified" iff `|filenames| >= batch_threshold`
    /// (spec §3, §4.8; a batch of exactly 1 is never batch-notified since
    /// the default threshold is 2 — spec §9 Open Question resolution).
    pub fn is_batch(&self, batch_threshold: usize) -> bool {
        self.filenames.len() >= batch_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_parts_rounds_up() {
        assert_eq!(UploadSession::total_parts(1, MIN_CHUNK_BYTES), 1);
        assert_eq!(UploadSession::total_parts(MIN_CHUNK_BYTES, MIN_CHUNK_BYTES), 1);
        assert_eq!(UploadSession::total_parts(MIN_CHUNK_BYTES + 1, MIN_CHUNK_BYTES), 2);
        assert_eq!(UploadSession::total_parts(734_003_200, 10_485_760), 70);
    }

    #[test]
    fn missing_parts_reports_gaps() {
        let mut s = UploadSession::new("id".into(), "f".into(), MIN_CHUNK_BYTES * 4, MIN_CHUNK_BYTES, "h".into());
        assert_eq!(s.total_parts, 4);
        s.register_part(1, "e1".into(), MIN_CHUNK_BYTES);
        s.register_part(2, "e2".into(), MIN_CHUNK_BYTES);
        s.register_part(4, "e4".into(), MIN_CHUNK_BYTES);
        assert_eq!(s.missing_parts(), vec![3]);
        assert!(!s.is_complete());
        s.register_part(3, "e3".into(), MIN_CHUNK_BYTES);
        assert!(s.is_complete());
    }

    #[test]
    fn retrying_a_part_replaces_etag() {
        let mut s = UploadSession::new("id".into(), "f".into(), MIN_CHUNK_BYTES, MIN_CHUNK_BYTES, "h".into());
        s.register_part(1, "etag-old".into(), 100);
        s.register_part(1, "etag-new".into(), 100);
        assert_eq!(s.uploaded_parts.len(), 1);
        assert_eq!(s.uploaded_parts[&1].etag, "etag-new");
    }

    #[test]
    fn batch_of_one_is_not_a_batch() {
        let ctx = BatchContext::new(vec!["a.wav".into()]);
        assert!(!ctx.is_batch(2));
        let ctx2 = BatchContext::new(vec!["a.wav".into(), "b.wav".into()]);
        assert!(ctx2.is_batch(2));
    }
}
