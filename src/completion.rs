//! Completion Pipeline (CP) — synchronous verification and response,
//! followed by a detached asynchronous enrichment tail (spec.md §4.7).

use crate::error::AppError;
use crate::storage::StorageBackend;
use crate::types::{BasicMetadata, CompletionRecord, EnrichedMetadata, UploadMethod};
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashSet;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// How many leading bytes of an object CP reads to sniff a format and, for
/// formats with a fixed-size header, compute duration. Large enough to
/// cover a canonical 44-byte WAV header with room to spare.
const SNIFF_WINDOW_BYTES: u64 = 64 * 1024;

/// Observability seam for tests: CP's enrichment tail runs on a detached
/// `tokio::spawn`, so tests need a way to know it finished without sleeping.
pub trait CompletionHook: Send + Sync {
    fn on_enriched(&self, record: &EnrichedMetadata);
}

pub struct NoopHook;

impl CompletionHook for NoopHook {
    fn on_enriched(&self, _record: &EnrichedMetadata) {}
}

pub struct CompletionPipeline {
    backend: Arc<dyn StorageBackend>,
    hook: Arc<dyn CompletionHook>,
    /// Filenames CP has already finalized, for the post-hoc duplicate
    /// re-check spec.md §4.4 assigns to this layer: PUC's own duplicate
    /// check is filename-based and racy (two concurrent presign requests
    /// for the same filename can both observe `absent`), so CP catches the
    /// second completion of the same filename here instead.
    completed: DashSet<String>,
}

impl CompletionPipeline {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend, hook: Arc::new(NoopHook), completed: DashSet::new() }
    }

    pub fn with_hook(backend: Arc<dyn StorageBackend>, hook: Arc<dyn CompletionHook>) -> Self {
        Self { backend, hook, completed: DashSet::new() }
    }

    /// Finalize an upload. Verifies presence synchronously (a miss here is
    /// the one case CP reports as a client-visible error, per spec.md
    /// §4.7 step 1) and returns `basic_metadata` immediately; richer
    /// extraction runs afterward, never blocking this return.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        filename: &str,
        declared_size: u64,
        etag: Option<String>,
        upload_method: UploadMethod,
    ) -> Result<CompletionRecord, AppError> {
        if !self.backend.exists(filename).await? {
            return Err(AppError::NotFoundAfterUpload(filename.to_string()));
        }

        if !self.completed.insert(filename.to_string()) {
            return Err(AppError::Duplicate { filename: filename.to_string() });
        }

        let basic_metadata = BasicMetadata {
            filename: filename.to_string(),
            file_size: declared_size,
            upload_time: Utc::now(),
            is_valid: true,
        };

        let record = CompletionRecord {
            filename: filename.to_string(),
            size: declared_size,
            etag,
            upload_method,
            completed_at: Utc::now(),
            basic_metadata,
        };

        self.spawn_enrichment(record.clone());
        Ok(record)
    }

    fn spawn_enrichment(&self, record: CompletionRecord) {
        let backend = self.backend.clone();
        let hook = self.hook.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            match enrich(&backend, &record).await {
                Ok(mut enriched) => {
                    enriched.processing_duration_ms = started.elapsed().as_millis() as u64;
                    let meta_key = format!("{}.meta.json", record.filename);
                    match serde_json::to_vec(&enriched) {
                        Ok(json) => {
                            if let Err(e) = backend.write_metadata(&meta_key, &json).await {
                                warn!(filename = %record.filename, error = %e, "failed to persist enriched metadata");
                            }
                        }
                        Err(e) => error!(filename = %record.filename, error = %e, "failed to serialize enriched metadata"),
                    }
                    info!(
                        filename = %record.filename,
                        processing_duration_ms = enriched.processing_duration_ms,
                        format = ?enriched.format,
                        "upload enrichment completed"
                    );
                    hook.on_enriched(&enriched);
                }
                Err(e) => {
                    // Async failures are operator-visible only, never surfaced
                    // to the client that already received its response.
                    warn!(filename = %record.filename, error = %e, "metadata enrichment failed");
                }
            }
        });
    }
}

async fn enrich(backend: &Arc<dyn StorageBackend>, record: &CompletionRecord) -> Result<EnrichedMetadata, AppError> {
    let window = backend.read_prefix(&record.filename, SNIFF_WINDOW_BYTES).await?;
    let format = sniff_format(&window);
    let duration_seconds = format.and_then(|f| duration_from_header(f, &window, record.size));
    let content_hash = Some(hex::encode(Sha256::digest(&window)));

    Ok(EnrichedMetadata {
        filename: record.filename.clone(),
        format: format.map(str::to_string),
        duration_seconds,
        content_hash,
        processing_duration_ms: 0,
    })
}

/// Identifies a container by its leading magic bytes. `None` for anything
/// unrecognized rather than guessing.
fn sniff_format(window: &Bytes) -> Option<&'static str> {
    if window.len() < 12 {
        return None;
    }
    if &window[0..4] == b"RIFF" && &window[8..12] == b"WAVE" {
        Some("wav")
    } else if &window[0..4] == b"fLaC" {
        Some("flac")
    } else if &window[0..4] == b"OggS" {
        Some("ogg")
    } else if &window[4..8] == b"ftyp" {
        Some("m4a")
    } else if &window[0..3] == b"ID3" || (window[0] == 0xFF && window[1] & 0xE0 == 0xE0) {
        Some("mp3")
    } else {
        None
    }
}

/// WAV declares `byte_rate` at a fixed offset in its canonical 44-byte
/// header; duration follows without decoding any audio frames. Other
/// containers need real frame parsing to get duration reliably, which is
/// out of scope here, so they resolve to `None`.
fn duration_from_header(format: &str, window: &Bytes, total_size: u64) -> Option<f64> {
    if format != "wav" || window.len() < 44 {
        return None;
    }
    let byte_rate = u32::from_le_bytes(window[28..32].try_into().ok()?);
    if byte_rate == 0 {
        return None;
    }
    const CANONICAL_HEADER_BYTES: u64 = 44;
    let audio_bytes = total_size.saturating_sub(CANONICAL_HEADER_BYTES);
    Some(audio_bytes as f64 / byte_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::FakeBackend;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, Duration};

    fn wav_bytes(sample_rate: u32, channels: u16, bits_per_sample: u16, audio_data_len: usize) -> Vec<u8> {
        let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
        let block_align = channels * (bits_per_sample / 8);
        let data_len = audio_data_len as u32;
        let mut buf = Vec::with_capacity(44 + audio_data_len);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&bits_per_sample.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.extend(std::iter::repeat(0u8).take(audio_data_len));
        buf
    }

    #[derive(Default)]
    struct RecordingHook {
        seen: StdMutex<Vec<EnrichedMetadata>>,
    }

    impl CompletionHook for RecordingHook {
        fn on_enriched(&self, record: &EnrichedMetadata) {
            self.seen.lock().unwrap().push(record.clone());
        }
    }

    #[tokio::test]
    async fn complete_fails_if_object_is_missing() {
        let backend = Arc::new(FakeBackend::new());
        let cp = CompletionPipeline::new(backend);
        let result = cp.complete("ghost.wav", 100, None, UploadMethod::DirectObjectStore).await;
        assert!(matches!(result, Err(AppError::NotFoundAfterUpload(_))));
    }

    #[tokio::test]
    async fn complete_returns_immediately_and_enriches_asynchronously() {
        let wav = wav_bytes(44_100, 2, 16, 1000);
        let backend = Arc::new(FakeBackend::new());
        backend.seed("song.wav", wav.clone());

        let hook = Arc::new(RecordingHook::default());
        let cp = CompletionPipeline::with_hook(backend, hook.clone());

        let record = cp.complete("song.wav", wav.len() as u64, Some("etag-1".into()), UploadMethod::StreamingProxy).await.unwrap();
        assert_eq!(record.basic_metadata.filename, "song.wav");
        assert!(record.basic_metadata.is_valid);

        for _ in 0..20 {
            if !hook.seen.lock().unwrap().is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        let seen = hook.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].format.as_deref(), Some("wav"));
        assert!(seen[0].duration_seconds.unwrap() > 0.0);
        assert!(seen[0].content_hash.is_some());
    }

    #[tokio::test]
    async fn second_completion_of_the_same_filename_is_a_duplicate() {
        let backend = Arc::new(FakeBackend::new());
        backend.seed("song.wav", "data");
        let cp = CompletionPipeline::new(backend);

        cp.complete("song.wav", 4, None, UploadMethod::DirectObjectStore).await.unwrap();
        let result = cp.complete("song.wav", 4, None, UploadMethod::DirectObjectStore).await;
        assert!(matches!(result, Err(AppError::Duplicate { filename }) if filename == "song.wav"));
    }

    #[test]
    fn sniff_format_recognizes_wav_and_rejects_garbage() {
        let wav = Bytes::from(wav_bytes(8000, 1, 8, 10));
        assert_eq!(sniff_format(&wav), Some("wav"));
        assert_eq!(sniff_format(&Bytes::from_static(b"not audio")), None);
    }
}
