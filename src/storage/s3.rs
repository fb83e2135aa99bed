//! S3-compatible object store backend using `aws-sdk-s3`.

use super::retry::with_backoff;
use super::traits::{CompletedPart, MultipartHandle, PartOutcome, PutOutcome, StorageBackend, StoreError};
use crate::config::ObjectStoreConfig;
use crate::pool::BufferPool;
use crate::types::EndpointVariant;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};
use uuid::Uuid;

/// How many buffers per bucket `stream_put`'s staging pool keeps around
/// (spec.md §4.2 POOL; concurrency is bounded by `UPLOAD_MAX_CONCURRENT_PROXY`
/// elsewhere, so this only needs to cover that many in-flight streams).
const POOL_MAX_PER_BUCKET: usize = 8;

/// How multipart uploads are realized against the configured object store
/// (spec.md §4.1). Both variants present the same `StorageBackend`
/// interface to MSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartStrategy {
    /// Forward directly to the store's own `CreateMultipartUpload` /
    /// `UploadPart` / `CompleteMultipartUpload` API.
    Native,
    /// Synthesize an opaque id, write `<key>.<id>.part<N>` side objects,
    /// and compose them into the final object on completion. For stores
    /// without a native multipart API.
    ComposeSideObjects,
}

const STREAM_PUT_CHUNK_BYTES: usize = crate::types::MIN_CHUNK_BYTES as usize;

pub struct S3Backend {
    internal_client: Client,
    public_client: Option<Client>,
    bucket: String,
    strategy: MultipartStrategy,
    pool: Arc<BufferPool>,
}

impl S3Backend {
    pub async fn new(config: &ObjectStoreConfig, strategy: MultipartStrategy) -> Result<Self, StoreError> {
        let internal_client = Self::build_client(config, config.internal_endpoint.as_deref()).await?;
        let public_client = match &config.public_endpoint {
            Some(endpoint) => Some(Self::build_client(config, Some(endpoint.as_str())).await?),
            None => None,
        };

        Ok(Self {
            internal_client,
            public_client,
            bucket: config.bucket.clone(),
            strategy,
            pool: Arc::new(BufferPool::new(POOL_MAX_PER_BUCKET)),
        })
    }

    async fn build_client(config: &ObjectStoreConfig, endpoint: Option<&str>) -> Result<Client, StoreError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()));

        if let Some(ep) = endpoint {
            loader = loader.endpoint_url(ep);
        }

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let credentials = Credentials::new(key_id, secret, None, None, "uploader-core-config");
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        Ok(Client::from_conf(s3_config))
    }

    fn client_for(&self, endpoint: EndpointVariant) -> Result<&Client, StoreError> {
        match endpoint {
            EndpointVariant::Internal => Ok(&self.internal_client),
            EndpointVariant::Public => self
                .public_client
                .as_ref()
                .ok_or_else(|| StoreError::Permanent("no public endpoint configured".into())),
        }
    }

    fn side_object_key(key: &str, upload_id: &str, part_number: u32) -> String {
        format!("{key}.{upload_id}.part{part_number}")
    }

    async fn put_object_bytes(&self, key: &str, data: Bytes) -> Result<PutOutcome, StoreError> {
        let size = data.len() as u64;
        let response = with_backoff("put_object", || async {
            self.internal_client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(data.clone()))
                .send()
                .await
                .map_err(classify_sdk_error)
        })
        .await?;

        Ok(PutOutcome { etag: response.e_tag().map(str::to_string), size })
    }

    async fn get_object_bytes(&self, key: &str) -> Result<Bytes, StoreError> {
        let response = self
            .internal_client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(format!("reading body failed: {e}")))?
            .into_bytes();

        Ok(data)
    }

    async fn get_object_range(&self, key: &str, max_bytes: u64) -> Result<Bytes, StoreError> {
        let response = self
            .internal_client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes=0-{}", max_bytes.saturating_sub(1)))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transient(format!("reading body failed: {e}")))?
            .into_bytes();

        Ok(data)
    }

    async fn delete_object_best_effort(&self, key: &str) {
        if let Err(e) = self.internal_client.delete_object().bucket(&self.bucket).key(key).send().await {
            warn!(key, error = %e, "failed to delete side object during cleanup");
        }
    }

    async fn native_initiate(&self, key: &str) -> Result<MultipartHandle, StoreError> {
        let response = with_backoff("create_multipart_upload", || async {
            self.internal_client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(classify_sdk_error)
        })
        .await?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| StoreError::Permanent("store returned no upload id".into()))?
            .to_string();

        Ok(MultipartHandle { upload_id })
    }

    async fn native_put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartOutcome, StoreError> {
        let size = data.len() as u64;
        let response = with_backoff("upload_part", || async {
            self.internal_client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number as i32)
                .body(ByteStream::from(data.clone()))
                .send()
                .await
                .map_err(classify_sdk_error)
        })
        .await?;

        let etag = response
            .e_tag()
            .ok_or_else(|| StoreError::Permanent("store returned no etag for part".into()))?
            .to_string();

        Ok(PartOutcome { etag, size })
    }

    async fn native_complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<PutOutcome, StoreError> {
        let completed: Vec<SdkCompletedPart> = parts
            .iter()
            .map(|p| SdkCompletedPart::builder().part_number(p.part_number as i32).e_tag(p.etag.clone()).build())
            .collect();

        let response = with_backoff("complete_multipart_upload", || async {
            let multipart_upload = CompletedMultipartUpload::builder().set_parts(Some(completed.clone())).build();
            self.internal_client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(multipart_upload)
                .send()
                .await
                .map_err(classify_sdk_error)
        })
        .await?;

        Ok(PutOutcome {
            etag: response.e_tag().map(str::to_string),
            // CompleteMultipartUpload does not echo total size; callers that
            // track it (stream_put) overwrite this afterward.
            size: 0,
        })
    }

    async fn native_abort(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        with_backoff("abort_multipart_upload", || async {
            self.internal_client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map(|_| ())
                .map_err(classify_sdk_error)
        })
        .await
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.internal_client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if let Some(service_error) = e.as_service_error() {
                    if service_error.is_not_found() {
                        return Ok(false);
                    }
                }
                Err(classify_sdk_error(e))
            }
        }
    }

    #[instrument(skip(self))]
    async fn presign_put(&self, key: &str, ttl: Duration, endpoint: EndpointVariant) -> Result<String, StoreError> {
        let client = self.client_for(endpoint)?;
        let presign_config =
            PresigningConfig::expires_in(ttl).map_err(|e| StoreError::Permanent(format!("invalid presign ttl: {e}")))?;

        let presigned = client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(classify_sdk_error)?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn initiate_multipart(&self, key: &str) -> Result<MultipartHandle, StoreError> {
        match self.strategy {
            MultipartStrategy::Native => self.native_initiate(key).await,
            MultipartStrategy::ComposeSideObjects => Ok(MultipartHandle { upload_id: Uuid::new_v4().to_string() }),
        }
    }

    #[instrument(skip(self))]
    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
        endpoint: EndpointVariant,
    ) -> Result<String, StoreError> {
        let client = self.client_for(endpoint)?;
        let presign_config =
            PresigningConfig::expires_in(ttl).map_err(|e| StoreError::Permanent(format!("invalid presign ttl: {e}")))?;

        match self.strategy {
            MultipartStrategy::Native => {
                let presigned = client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number as i32)
                    .presigned(presign_config)
                    .await
                    .map_err(classify_sdk_error)?;
                Ok(presigned.uri().to_string())
            }
            MultipartStrategy::ComposeSideObjects => {
                let side_key = Self::side_object_key(key, upload_id, part_number);
                let presigned = client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&side_key)
                    .presigned(presign_config)
                    .await
                    .map_err(classify_sdk_error)?;
                Ok(presigned.uri().to_string())
            }
        }
    }

    #[instrument(skip(self, data))]
    async fn put_part(&self, key: &str, upload_id: &str, part_number: u32, data: Bytes) -> Result<PartOutcome, StoreError> {
        match self.strategy {
            MultipartStrategy::Native => self.native_put_part(key, upload_id, part_number, data).await,
            MultipartStrategy::ComposeSideObjects => {
                let side_key = Self::side_object_key(key, upload_id, part_number);
                let size = data.len() as u64;
                let outcome = self.put_object_bytes(&side_key, data).await?;
                Ok(PartOutcome { etag: outcome.etag.unwrap_or_default(), size })
            }
        }
    }

    #[instrument(skip(self, parts))]
    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: Vec<CompletedPart>) -> Result<PutOutcome, StoreError> {
        match self.strategy {
            MultipartStrategy::Native => self.native_complete(key, upload_id, parts).await,
            MultipartStrategy::ComposeSideObjects => {
                let mut ordered = parts;
                ordered.sort_by_key(|p| p.part_number);

                let mut chunks = Vec::with_capacity(ordered.len());
                let mut total = 0u64;
                for part in &ordered {
                    let side_key = Self::side_object_key(key, upload_id, part.part_number);
                    let data = self.get_object_bytes(&side_key).await?;
                    total += data.len() as u64;
                    chunks.push(data);
                }

                let mut combined = BytesMut::with_capacity(total as usize);
                for chunk in chunks {
                    combined.extend_from_slice(&chunk);
                }

                let outcome = self.put_object_bytes(key, combined.freeze()).await?;

                for part in &ordered {
                    let side_key = Self::side_object_key(key, upload_id, part.part_number);
                    self.delete_object_best_effort(&side_key).await;
                }

                Ok(outcome)
            }
        }
    }

    #[instrument(skip(self))]
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        match self.strategy {
            MultipartStrategy::Native => self.native_abort(key, upload_id).await,
            MultipartStrategy::ComposeSideObjects => {
                let prefix = format!("{key}.{upload_id}.part");
                let response = self
                    .internal_client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix)
                    .send()
                    .await
                    .map_err(classify_sdk_error)?;

                if let Some(contents) = response.contents {
                    for object in contents {
                        if let Some(side_key) = object.key {
                            self.delete_object_best_effort(&side_key).await;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    #[instrument(skip(self, body))]
    async fn stream_put(&self, key: &str, mut body: BoxStream<'static, Result<Bytes, std::io::Error>>) -> Result<PutOutcome, StoreError> {
        // Always goes through the store's native multipart API regardless of
        // `strategy`: this is ZMP's own backing write, bounded to one chunk
        // (MIN_CHUNK_BYTES) in flight at a time, never the whole object
        // (spec.md §4.6).
        let handle = self.native_initiate(key).await?;
        let mut part_number = 1u32;
        let mut parts = Vec::new();
        // Staging buffer comes from POOL rather than a one-off allocation
        // proportional to the part size (spec.md §4.2); `acquire` hands back
        // a zeroed buffer, so it's cleared to drop straight into accumulating
        // chunks at length 0 with `STREAM_PUT_CHUNK_BYTES` of capacity.
        let mut buffer = self.pool.acquire(STREAM_PUT_CHUNK_BYTES);
        buffer.as_mut().clear();
        let mut total = 0u64;

        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    total += chunk.len() as u64;
                    buffer.as_mut().extend_from_slice(&chunk);
                    if buffer.as_mut().len() >= STREAM_PUT_CHUNK_BYTES {
                        match self.native_put_part(key, &handle.upload_id, part_number, buffer.as_mut().split().freeze()).await {
                            Ok(part) => {
                                parts.push(CompletedPart { part_number, etag: part.etag });
                                part_number += 1;
                            }
                            Err(e) => {
                                let _ = self.native_abort(key, &handle.upload_id).await;
                                return Err(e);
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = self.native_abort(key, &handle.upload_id).await;
                    return Err(StoreError::Transient(format!("reading upload stream failed: {e}")));
                }
                None => break,
            }
        }

        if !buffer.as_mut().is_empty() || parts.is_empty() {
            match self.native_put_part(key, &handle.upload_id, part_number, buffer.as_mut().split().freeze()).await {
                Ok(part) => parts.push(CompletedPart { part_number, etag: part.etag }),
                Err(e) => {
                    let _ = self.native_abort(key, &handle.upload_id).await;
                    return Err(e);
                }
            }
        }

        let mut outcome = self.native_complete(key, &handle.upload_id, parts).await?;
        outcome.size = total;
        Ok(outcome)
    }

    #[instrument(skip(self, json))]
    async fn write_metadata(&self, key: &str, json: &[u8]) -> Result<(), StoreError> {
        self.put_object_bytes(key, Bytes::copy_from_slice(json)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_prefix(&self, key: &str, max_bytes: u64) -> Result<Bytes, StoreError> {
        self.get_object_range(key, max_bytes).await
    }
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => StoreError::Unreachable(err.to_string()),
        SdkError::ServiceError(_) => {
            let code = err.code().unwrap_or_default();
            let message = err.to_string();
            match code {
                "NoSuchKey" | "NoSuchUpload" | "NotFound" => StoreError::NotFound(message),
                "BucketAlreadyOwnedByYou" | "BucketAlreadyExists" => StoreError::AlreadyExists(message),
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => StoreError::AuthRejected(message),
                "SlowDown" | "ServiceUnavailable" | "RequestTimeout" | "InternalError" => StoreError::Transient(message),
                _ => StoreError::Permanent(message),
            }
        }
        _ => StoreError::Transient(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_object_key_is_namespaced_by_upload_id() {
        assert_eq!(
            S3Backend::side_object_key("songs/track.wav", "abc123", 3),
            "songs/track.wav.abc123.part3"
        );
    }
}
