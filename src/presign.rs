//! Presigned-URL Coordinator (PUC) — issues presigned PUT URLs, rejecting
//! duplicate filenames before handing one out (spec.md §4.4).

use crate::config::{PRESIGNED_TTL_MAX, PRESIGNED_TTL_MIN};
use crate::error::AppError;
use crate::storage::StorageBackend;
use crate::types::{EndpointVariant, UploadIntent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub struct PresignCoordinator {
    backend: Arc<dyn StorageBackend>,
}

/// A single presign result, paired with its filename for batch responses.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PresignedUpload {
    pub filename: String,
    pub url: String,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Outcome of one item within `issue_batch` — mirrors spec.md §4.4's
/// per-item, non-transactional semantics (one duplicate does not fail
/// siblings).
#[derive(Debug, Clone)]
pub enum BatchPresignOutcome {
    Issued(PresignedUpload),
    Duplicate { filename: String },
}

impl PresignCoordinator {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn bound_ttl(ttl: Duration) -> Duration {
        ttl.clamp(PRESIGNED_TTL_MIN, PRESIGNED_TTL_MAX)
    }

    /// Issue one presigned PUT URL. Rejects with `AppError::Duplicate` if an
    /// object with this filename already exists (spec.md §4.4: duplicate
    /// detection by filename happens before a URL is ever handed out).
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        filename: &str,
        file_size: u64,
        ttl: Duration,
        endpoint: EndpointVariant,
    ) -> Result<(UploadIntent, PresignedUpload), AppError> {
        if self.backend.exists(filename).await? {
            return Err(AppError::Duplicate { filename: filename.to_string() });
        }

        let ttl = Self::bound_ttl(ttl);
        let url = self.backend.presign_put(filename, ttl, endpoint).await?;
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));

        let intent = UploadIntent { filename: filename.to_string(), file_size, expires_at };
        let presigned = PresignedUpload { filename: filename.to_string(), url, expires_at };
        Ok((intent, presigned))
    }

    /// Issue presigned URLs for a batch of filenames. Non-transactional:
    /// each filename either succeeds or comes back as a named duplicate, the
    /// way the teacher's `delete_objects` handler tallies per-item outcomes
    /// rather than failing the whole request on one bad key.
    #[instrument(skip(self, items))]
    pub async fn issue_batch(
        &self,
        items: &[(String, u64)],
        ttl: Duration,
        endpoint: EndpointVariant,
    ) -> Result<Vec<BatchPresignOutcome>, AppError> {
        let mut outcomes = Vec::with_capacity(items.len());
        for (filename, file_size) in items {
            match self.issue(filename, *file_size, ttl, endpoint).await {
                Ok((_, presigned)) => outcomes.push(BatchPresignOutcome::Issued(presigned)),
                Err(AppError::Duplicate { filename }) => outcomes.push(BatchPresignOutcome::Duplicate { filename }),
                Err(other) => return Err(other),
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::FakeBackend;

    #[tokio::test]
    async fn rejects_duplicate_filename() {
        let backend = Arc::new(FakeBackend::new());
        backend.seed("song.wav", "existing");
        let puc = PresignCoordinator::new(backend);

        let result = puc.issue("song.wav", 1024, Duration::from_secs(60), EndpointVariant::Internal).await;
        assert!(matches!(result, Err(AppError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn ttl_is_clamped_within_bounds() {
        let backend = Arc::new(FakeBackend::new());
        let puc = PresignCoordinator::new(backend);

        let (intent, _) = puc.issue("new.wav", 1024, Duration::from_secs(1), EndpointVariant::Internal).await.unwrap();
        let ttl = intent.expires_at - Utc::now();
        assert!(ttl.num_seconds() >= PRESIGNED_TTL_MIN.as_secs() as i64 - 1);
    }

    #[tokio::test]
    async fn batch_reports_duplicates_without_failing_siblings() {
        let backend = Arc::new(FakeBackend::new());
        backend.seed("dup.wav", "existing");
        let puc = PresignCoordinator::new(backend);

        let items = vec![("dup.wav".to_string(), 10), ("fresh.wav".to_string(), 20)];
        let outcomes = puc.issue_batch(&items, Duration::from_secs(60), EndpointVariant::Internal).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], BatchPresignOutcome::Duplicate { .. }));
        assert!(matches!(outcomes[1], BatchPresignOutcome::Issued(_)));
    }
}
