//! Multipart session endpoints (spec.md §6, MSM).

use super::AppState;
use crate::batch::BatchItemOutcome;
use crate::error::AppError;
use crate::types::{EndpointVariant, UploadMethod};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub filename: String,
    pub file_size: u64,
    pub chunk_size: Option<u64>,
    pub file_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub success: bool,
    pub upload_id: String,
    pub total_parts: u32,
    pub chunk_size: u64,
}

pub async fn init_session(State(state): State<Arc<AppState>>, Json(req): Json<InitRequest>) -> Result<Json<InitResponse>, AppError> {
    if req.file_size == 0 {
        return Err(AppError::ClientInput("fileSize must be greater than zero".to_string()));
    }
    let session = state.multipart.initiate(&req.filename, req.file_size, req.chunk_size, req.file_hash).await?;
    Ok(Json(InitResponse {
        success: true,
        upload_id: session.upload_id,
        total_parts: session.total_parts,
        chunk_size: session.chunk_size,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPartQuery {
    pub upload_id: String,
    pub part_number: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPartResponse {
    pub success: bool,
    pub url: String,
    pub part_number: u32,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn presign_part(State(state): State<Arc<AppState>>, Query(q): Query<PresignPartQuery>) -> Result<Json<PresignPartResponse>, AppError> {
    let ttl = state.config.presigned_ttl;
    let url = state.multipart.presign_part(&q.upload_id, q.part_number, ttl, EndpointVariant::Internal).await?;
    Ok(Json(PresignPartResponse {
        success: true,
        url,
        part_number: q.part_number,
        expires_at: chrono::Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPartInput {
    pub part_number: u32,
    pub etag: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub upload_id: String,
    pub parts: Vec<CompletedPartInput>,
}

#[derive(Debug, Serialize)]
pub struct CompleteMultipartResponse {
    pub success: bool,
    pub filename: String,
    pub size: u64,
}

/// Completes the compose on the store side, then funnels the result through
/// CP/BC the same way `/upload/complete` does (spec.md §4.5 "emit
/// CompletionRecord to CP"; single-session completion is just a batch of
/// one, same as the other completion endpoints).
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompleteMultipartRequest>,
) -> Result<Json<CompleteMultipartResponse>, AppError> {
    let reported: Vec<(u32, String, u64)> = req.parts.into_iter().map(|p| (p.part_number, p.etag, p.size)).collect();
    let (session, etag) = state.multipart.complete(&req.upload_id, reported).await?;

    let mut result = state
        .batch
        .complete_batch(vec![(session.filename.clone(), session.file_size, etag, UploadMethod::MultipartCompose)])
        .await;

    match result.results.pop() {
        Some((_, BatchItemOutcome::Success { record })) => Ok(Json(CompleteMultipartResponse { success: true, filename: record.filename, size: record.size })),
        Some((filename, BatchItemOutcome::Duplicate)) => Err(AppError::Duplicate { filename }),
        Some((filename, BatchItemOutcome::Error { message })) => Err(AppError::NotFoundAfterUpload(format!("{filename}: {message}"))),
        None => Err(AppError::InvariantViolation("batch completer returned no result for a single-item batch".to_string())),
    }
}

pub async fn abort_session(State(state): State<Arc<AppState>>, Path(upload_id): Path<String>) -> Result<Json<serde_json::Value>, AppError> {
    state.multipart.abort(&upload_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.multipart.list_sessions();
    Json(serde_json::json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions,
    }))
}
