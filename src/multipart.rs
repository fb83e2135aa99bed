//! Multipart Session Manager (MSM) — session registry, admission gating,
//! and the `active -> completed/aborted` state machine (spec.md §4.5).
//!
//! Parts are uploaded directly by the client to presigned per-part URLs, the
//! way native S3 multipart uploads work: this service never buffers part
//! bytes itself. The client collects each part's ETag from the object
//! store's own response and reports the full ordered list at `complete`
//! time, which is when sessions here record `uploaded_parts` (see
//! DESIGN.md Open Question decisions).

use crate::config::{PRESIGNED_TTL_MAX, PRESIGNED_TTL_MIN};
use crate::error::AppError;
use crate::route::clamp_chunk_size;
use crate::storage::{CompletedPart as StoreCompletedPart, StorageBackend};
use crate::types::{EndpointVariant, SessionStatus, UploadSession};
use chrono::Duration as ChronoDuration;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, instrument, warn};

const ADMISSION_RETRY_AFTER_SECS: u64 = 5;

struct SessionEntry {
    session: SyncMutex<UploadSession>,
    /// Held for the lifetime of an active session; dropped on
    /// complete/abort/reap to free an admission slot.
    _permit: OwnedSemaphorePermit,
}

pub struct MultipartManager {
    backend: Arc<dyn StorageBackend>,
    sessions: DashMap<String, SessionEntry>,
    admission: Arc<Semaphore>,
    session_timeout: ChronoDuration,
    max_upload_bytes: u64,
    /// `file_hash`es of sessions that reached `completed`, checked at
    /// `initiate` so a second upload of already-ingested content is
    /// rejected even under a different filename (spec.md §4.5).
    completed_hashes: DashSet<String>,
    reaped_total: AtomicU64,
}

impl MultipartManager {
    pub fn new(backend: Arc<dyn StorageBackend>, max_concurrent: usize, max_upload_bytes: u64, session_timeout: Duration) -> Self {
        Self {
            backend,
            sessions: DashMap::new(),
            admission: Arc::new(Semaphore::new(max_concurrent)),
            session_timeout: ChronoDuration::from_std(session_timeout).unwrap_or(ChronoDuration::hours(24)),
            max_upload_bytes,
            completed_hashes: DashSet::new(),
            reaped_total: AtomicU64::new(0),
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn reaped_total(&self) -> u64 {
        self.reaped_total.load(Ordering::Relaxed)
    }

    /// Open a new multipart session. Rejects a duplicate filename
    /// (spec.md §4.5) and enforces `UPLOAD_MAX_CONCURRENT` via an
    /// immediate, non-queuing admission check (spec.md §5: `try_acquire`,
    /// never queued).
    #[instrument(skip(self))]
    pub async fn initiate(&self, filename: &str, file_size: u64, chunk_size: Option<u64>, file_hash: String) -> Result<UploadSession, AppError> {
        if file_size > self.max_upload_bytes {
            return Err(AppError::ClientInput(format!(
                "file_size {file_size} exceeds max_upload_bytes {}",
                self.max_upload_bytes
            )));
        }
        if self.completed_hashes.contains(&file_hash) {
            return Err(AppError::Duplicate { filename: filename.to_string() });
        }
        if self.backend.exists(filename).await? {
            return Err(AppError::Duplicate { filename: filename.to_string() });
        }

        let permit = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| AppError::Admission { retry_after_secs: ADMISSION_RETRY_AFTER_SECS })?;

        let chunk_size = clamp_chunk_size(chunk_size);
        let handle = self.backend.initiate_multipart(filename).await?;
        let session = UploadSession::new(handle.upload_id.clone(), filename.to_string(), file_size, chunk_size, file_hash);

        self.sessions.insert(
            handle.upload_id.clone(),
            SessionEntry { session: SyncMutex::new(session.clone()), _permit: permit },
        );

        info!(upload_id = %session.upload_id, filename, total_parts = session.total_parts, "multipart session opened");
        Ok(session)
    }

    fn get_active(&self, upload_id: &str) -> Result<dashmap::mapref::one::Ref<'_, String, SessionEntry>, AppError> {
        let entry = self.sessions.get(upload_id).ok_or_else(|| AppError::NotFound(upload_id.to_string()))?;
        if entry.session.lock().status != SessionStatus::Active {
            return Err(AppError::InvariantViolation(format!("session {upload_id} is not active")));
        }
        Ok(entry)
    }

    /// Presign a PUT for one part of an active session, bounding the TTL
    /// the same way PUC does.
    #[instrument(skip(self))]
    pub async fn presign_part(&self, upload_id: &str, part_number: u32, ttl: Duration, endpoint: EndpointVariant) -> Result<String, AppError> {
        let filename = {
            let entry = self.get_active(upload_id)?;
            let mut session = entry.session.lock();
            session.touch();
            session.filename.clone()
        };

        let ttl = ttl.clamp(PRESIGNED_TTL_MIN, PRESIGNED_TTL_MAX);
        let url = self.backend.presign_part(&filename, upload_id, part_number, ttl, endpoint).await?;
        Ok(url)
    }

    /// Finalize a session from the client-reported `(part_number, etag)`
    /// list. Registers every reported part, then requires full coverage of
    /// `1..=total_parts` before calling through to the store. Returns the
    /// finished session alongside the compose etag, which the caller feeds
    /// into CP's `CompletionRecord` (spec.md §4.5 "emit CompletionRecord to
    /// CP").
    #[instrument(skip(self, reported_parts))]
    pub async fn complete(&self, upload_id: &str, reported_parts: Vec<(u32, String, u64)>) -> Result<(UploadSession, Option<String>), AppError> {
        let (filename, missing) = {
            let entry = self.get_active(upload_id)?;
            let mut session = entry.session.lock();
            for (part_number, etag, size) in &reported_parts {
                session.register_part(*part_number, etag.clone(), *size);
            }
            (session.filename.clone(), session.missing_parts())
        };

        if !missing.is_empty() {
            return Err(AppError::IncompleteUpload(upload_id.to_string(), missing));
        }

        let store_parts: Vec<StoreCompletedPart> =
            reported_parts.iter().map(|(n, e, _)| StoreCompletedPart { part_number: *n, etag: e.clone() }).collect();

        let outcome = self.backend.complete_multipart(&filename, upload_id, store_parts).await?;

        let finished = {
            let entry = self.sessions.get(upload_id).ok_or_else(|| AppError::NotFound(upload_id.to_string()))?;
            let mut session = entry.session.lock();
            session.status = SessionStatus::Completed;
            session.touch();
            session.clone()
        };

        self.completed_hashes.insert(finished.file_hash.clone());
        self.sessions.remove(upload_id);
        info!(upload_id, filename = %finished.filename, "multipart session completed");
        Ok((finished, outcome.etag))
    }

    /// Abort an active session, releasing its admission slot and any
    /// store-side resources.
    #[instrument(skip(self))]
    pub async fn abort(&self, upload_id: &str) -> Result<(), AppError> {
        let filename = {
            let entry = self.sessions.get(upload_id).ok_or_else(|| AppError::NotFound(upload_id.to_string()))?;
            let filename = entry.session.lock().filename.clone();
            filename
        };

        self.backend.abort_multipart(&filename, upload_id).await?;
        self.sessions.remove(upload_id);
        info!(upload_id, filename, "multipart session aborted");
        Ok(())
    }

    /// Snapshot of all sessions for `GET /upload/multipart/sessions`.
    pub fn list_sessions(&self) -> Vec<UploadSession> {
        self.sessions.iter().map(|entry| entry.session.lock().clone()).collect()
    }

    /// Abort and drop every session whose `last_activity` exceeds
    /// `session_timeout` (spec.md §4.5, run periodically from `main.rs`).
    #[instrument(skip(self))]
    pub async fn reap_stale(&self) {
        let stale_ids: Vec<(String, String)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.session.lock();
                session.is_stale(self.session_timeout).then(|| (entry.key().clone(), session.filename.clone()))
            })
            .collect();

        for (upload_id, filename) in stale_ids {
            if let Err(e) = self.backend.abort_multipart(&filename, &upload_id).await {
                warn!(upload_id, error = %e, "failed to abort stale session at the store; dropping locally anyway");
            }
            self.sessions.remove(&upload_id);
            self.reaped_total.fetch_add(1, Ordering::Relaxed);
            info!(upload_id, filename, "reaped stale multipart session");
        }
    }
}
