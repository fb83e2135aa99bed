//! In-memory `StorageBackend` used by tests in place of a real S3-compatible
//! store (no MinIO/Docker dependency), the same role the teacher's
//! filesystem backend played for its own test suite.

use super::traits::{CompletedPart, MultipartHandle, PartOutcome, PutOutcome, StorageBackend, StoreError};
use crate::types::EndpointVariant;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct State {
    objects: HashMap<String, Bytes>,
    multipart_parts: HashMap<String, HashMap<u32, Bytes>>,
    /// Keys that should fail their next operation with a given error, for
    /// exercising OSA failure handling without a real store.
    fault_injections: HashMap<String, StoreError>,
    presign_calls: Vec<(String, EndpointVariant)>,
}

/// Deterministic, in-process stand-in for an S3-compatible store.
pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Pre-seed an object as if it had already been uploaded (for duplicate
    /// detection tests).
    pub fn seed(&self, key: &str, data: impl Into<Bytes>) {
        self.state.lock().objects.insert(key.to_string(), data.into());
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Make the next operation touching `key` fail with `error`, once.
    pub fn inject_fault(&self, key: &str, error: StoreError) {
        self.state.lock().fault_injections.insert(key.to_string(), error);
    }

    pub fn presign_call_count(&self) -> usize {
        self.state.lock().presign_calls.len()
    }

    fn take_fault(&self, key: &str) -> Option<StoreError> {
        self.state.lock().fault_injections.remove(key)
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        Ok(self.state.lock().objects.contains_key(key))
    }

    async fn presign_put(&self, key: &str, _ttl: Duration, endpoint: EndpointVariant) -> Result<String, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        let mut state = self.state.lock();
        state.presign_calls.push((key.to_string(), endpoint));
        let variant = match endpoint {
            EndpointVariant::Internal => "internal",
            EndpointVariant::Public => "public",
        };
        Ok(format!("https://fake-store.test/{variant}/{key}?X-Fake-Signature=1"))
    }

    async fn initiate_multipart(&self, key: &str) -> Result<MultipartHandle, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        let upload_id = Uuid::new_v4().to_string();
        self.state.lock().multipart_parts.insert(upload_id.clone(), HashMap::new());
        Ok(MultipartHandle { upload_id })
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        _ttl: Duration,
        endpoint: EndpointVariant,
    ) -> Result<String, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        let variant = match endpoint {
            EndpointVariant::Internal => "internal",
            EndpointVariant::Public => "public",
        };
        Ok(format!("https://fake-store.test/{variant}/{key}?uploadId={upload_id}&partNumber={part_number}"))
    }

    async fn put_part(&self, key: &str, upload_id: &str, part_number: u32, data: Bytes) -> Result<PartOutcome, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        let size = data.len() as u64;
        let mut state = self.state.lock();
        let parts = state
            .multipart_parts
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("no such multipart upload: {upload_id}")))?;
        parts.insert(part_number, data);
        Ok(PartOutcome { etag: format!("etag-{upload_id}-{part_number}"), size })
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, mut parts: Vec<CompletedPart>) -> Result<PutOutcome, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        parts.sort_by_key(|p| p.part_number);

        let mut state = self.state.lock();
        let stored = state
            .multipart_parts
            .remove(upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("no such multipart upload: {upload_id}")))?;

        let mut combined = BytesMut::new();
        for part in &parts {
            let chunk = stored
                .get(&part.part_number)
                .ok_or_else(|| StoreError::Permanent(format!("missing part {} at completion", part.part_number)))?;
            combined.extend_from_slice(chunk);
        }

        let data = combined.freeze();
        let size = data.len() as u64;
        state.objects.insert(key.to_string(), data);
        Ok(PutOutcome { etag: Some(format!("etag-{upload_id}-final")), size })
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.state.lock().multipart_parts.remove(upload_id);
        Ok(())
    }

    async fn stream_put(&self, key: &str, mut body: BoxStream<'static, Result<Bytes, std::io::Error>>) -> Result<PutOutcome, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        let mut combined = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StoreError::Transient(e.to_string()))?;
            combined.extend_from_slice(&chunk);
        }
        let data = combined.freeze();
        let size = data.len() as u64;
        self.state.lock().objects.insert(key.to_string(), data);
        Ok(PutOutcome { etag: Some(format!("etag-stream-{key}")), size })
    }

    async fn write_metadata(&self, key: &str, json: &[u8]) -> Result<(), StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        self.state.lock().objects.insert(key.to_string(), Bytes::copy_from_slice(json));
        Ok(())
    }

    async fn read_prefix(&self, key: &str, max_bytes: u64) -> Result<Bytes, StoreError> {
        if let Some(err) = self.take_fault(key) {
            return Err(err);
        }
        let state = self.state.lock();
        let data = state.objects.get(key).ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let end = (max_bytes as usize).min(data.len());
        Ok(data.slice(0..end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multipart_roundtrip_reassembles_parts_in_order() {
        let backend = FakeBackend::new();
        let handle = backend.initiate_multipart("song.wav").await.unwrap();
        backend.put_part("song.wav", &handle.upload_id, 2, Bytes::from_static(b"world")).await.unwrap();
        backend.put_part("song.wav", &handle.upload_id, 1, Bytes::from_static(b"hello ")).await.unwrap();

        let outcome = backend
            .complete_multipart(
                "song.wav",
                &handle.upload_id,
                vec![
                    CompletedPart { part_number: 1, etag: "e1".into() },
                    CompletedPart { part_number: 2, etag: "e2".into() },
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.size, 11);
        assert_eq!(backend.get("song.wav").unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn fault_injection_fires_once() {
        let backend = FakeBackend::new();
        backend.inject_fault("x", StoreError::Transient("boom".into()));
        assert!(backend.exists("x").await.is_err());
        assert!(!backend.exists("x").await.unwrap());
        // second call succeeds (no object "x" exists) because the fault is
        // removed after it fires once
    }
}
