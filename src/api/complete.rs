//! `POST /upload/complete` and `/upload/complete-batch` (spec.md §6,
//! CP / BC).
//!
//! Both endpoints go through `BatchCompleter` — a single file is just a
//! batch of one — so notification gating (per-file vs batch events) has
//! exactly one implementation (see DESIGN.md's Open Question decision on
//! centralizing notification emission in BC).

use super::AppState;
use crate::batch::{BatchItemOutcome, BatchResult};
use crate::error::AppError;
use crate::types::{CompletionRecord, UploadMethod};
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub filename: String,
    pub size: u64,
    pub etag: Option<String>,
    #[serde(default)]
    pub upload_method: Option<UploadMethod>,
}

pub async fn complete_upload(State(state): State<Arc<AppState>>, Json(req): Json<CompleteRequest>) -> Result<Json<CompletionRecord>, AppError> {
    let method = req.upload_method.unwrap_or(UploadMethod::DirectObjectStore);
    let mut result = state.batch.complete_batch(vec![(req.filename, req.size, req.etag, method)]).await;
    match result.results.pop() {
        Some((_, BatchItemOutcome::Success { record })) => Ok(Json(record)),
        Some((filename, BatchItemOutcome::Duplicate)) => Err(AppError::Duplicate { filename }),
        Some((filename, BatchItemOutcome::Error { message })) => Err(AppError::NotFoundAfterUpload(format!("{filename}: {message}"))),
        None => Err(AppError::InvariantViolation("batch completer returned no result for a single-item batch".to_string())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBatchItem {
    pub filename: String,
    pub size: u64,
    pub etag: Option<String>,
    #[serde(default)]
    pub upload_method: Option<UploadMethod>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBatchRequest {
    pub filenames: Vec<CompleteBatchItem>,
}

pub async fn complete_batch(State(state): State<Arc<AppState>>, Json(req): Json<CompleteBatchRequest>) -> Json<BatchResult> {
    let items = req
        .filenames
        .into_iter()
        .map(|item| (item.filename, item.size, item.etag, item.upload_method.unwrap_or(UploadMethod::DirectObjectStore)))
        .collect();
    Json(state.batch.complete_batch(items).await)
}
