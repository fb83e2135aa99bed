//! `POST /upload/presigned` and `/upload/presigned-batch` (spec.md §6,
//! PUC.issue / PUC.issue_batch).

use super::AppState;
use crate::error::AppError;
use crate::presign::BatchPresignOutcome;
use crate::route::{self, RouteDecision};
use crate::types::{EndpointVariant, UploadMethod};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub filename: String,
    pub file_size: u64,
}

/// Decides a route for `(filename, file_size)` and, for the two routes PUC
/// can actually presign against (public CDN or direct-internal), issues a
/// URL. `DirectInternal` covers both "under the CDN limit with no public
/// endpoint" and "over the CDN limit but still a single PUT" (spec.md §9
/// S2) — both hand back a direct-endpoint presigned URL, differing only in
/// the `isLargeFile` flag. A `Multipart` decision means the file exceeds
/// the single-part cap; the caller is pointed at the multipart init
/// endpoint instead of being handed a URL here.
pub async fn issue_presigned(State(state): State<Arc<AppState>>, Json(req): Json<PresignRequest>) -> Result<Json<serde_json::Value>, AppError> {
    if req.file_size == 0 {
        return Err(AppError::ClientInput("fileSize must be greater than zero".to_string()));
    }
    if req.file_size > state.config.max_upload_bytes {
        return Err(AppError::ClientInput(format!("fileSize exceeds max_upload_bytes {}", state.config.max_upload_bytes)));
    }

    let decision = route::choose(
        req.file_size,
        state.config.large_file_threshold_bytes,
        state.config.single_part_max_bytes,
        state.config.has_public_endpoint(),
    );

    match decision {
        RouteDecision::Multipart => Ok(Json(json!({
            "success": true,
            "isLargeFile": true,
            "uploadMethod": UploadMethod::MultipartProxy.as_str(),
            "uploadUrl": null,
            "multipartInitUrl": "/upload/multipart/init",
        }))),
        RouteDecision::PresignedPublic | RouteDecision::DirectInternal => {
            let (endpoint, method) = match decision {
                RouteDecision::PresignedPublic => (EndpointVariant::Public, UploadMethod::PresignedCloudflare),
                _ => (EndpointVariant::Internal, UploadMethod::DirectObjectStore),
            };
            let (_, presigned) = state.presign.issue(&req.filename, req.file_size, state.config.presigned_ttl, endpoint).await?;
            Ok(Json(json!({
                "success": true,
                "uploadUrl": presigned.url,
                "isLargeFile": req.file_size > state.config.large_file_threshold_bytes,
                "uploadMethod": method.as_str(),
                "expires": presigned.expires_at,
            })))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PresignBatchRequest {
    pub files: Vec<PresignRequest>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PresignBatchItem {
    Issued { filename: String, url: String, expires: chrono::DateTime<chrono::Utc> },
    Duplicate { filename: String },
}

#[derive(Debug, Serialize)]
pub struct PresignBatchResponse {
    pub success: bool,
    pub results: Vec<PresignBatchItem>,
    pub success_count: u32,
    pub duplicate_count: u32,
    pub error_count: u32,
}

/// At most `batch_max` entries per spec.md §4.4; anything over that is a
/// client error rather than a silently truncated batch.
pub async fn issue_presigned_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PresignBatchRequest>,
) -> Result<Json<PresignBatchResponse>, AppError> {
    if req.files.len() > state.config.batch_max {
        return Err(AppError::ClientInput(format!("batch of {} exceeds batch_max {}", req.files.len(), state.config.batch_max)));
    }

    let items: Vec<(String, u64)> = req.files.iter().map(|f| (f.filename.clone(), f.file_size)).collect();
    let outcomes = state.presign.issue_batch(&items, state.config.presigned_ttl, EndpointVariant::Internal).await?;

    let mut success_count = 0;
    let mut duplicate_count = 0;
    let results = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            BatchPresignOutcome::Issued(p) => {
                success_count += 1;
                PresignBatchItem::Issued { filename: p.filename, url: p.url, expires: p.expires_at }
            }
            BatchPresignOutcome::Duplicate { filename } => {
                duplicate_count += 1;
                PresignBatchItem::Duplicate { filename }
            }
        })
        .collect();

    Ok(Json(PresignBatchResponse {
        success: true,
        results,
        success_count,
        duplicate_count,
        error_count: 0,
    }))
}
