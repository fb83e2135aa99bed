//! `PUT /upload/zero-memory-proxy` and `POST /upload/zero-memory-url`
//! (spec.md §6, ZMP).

use super::AppState;
use crate::batch::BatchItemOutcome;
use crate::error::AppError;
use crate::types::UploadMethod;
use axum::extract::{Query, State};
use axum::http::header;
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub filename: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUploadResponse {
    pub success: bool,
    pub size: u64,
    pub etag: Option<String>,
    pub upload_method: &'static str,
}

/// Content-Length is required by spec.md §6 ("raw body, Content-Length
/// required"); axum/hyper reject chunked bodies without one implicitly
/// for most clients, but we check explicitly so a missing header surfaces
/// as a clear 400 instead of an opaque store-side failure later.
pub async fn zero_memory_proxy(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ProxyQuery>,
    request: axum::extract::Request,
) -> Result<Json<ProxyUploadResponse>, AppError> {
    if !request.headers().contains_key(header::CONTENT_LENGTH) {
        return Err(AppError::ClientInput("Content-Length header is required".to_string()));
    }

    let body = request.into_body();
    let stream = body.into_data_stream().map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

    let outcome = state.proxy.proxy(&q.filename, stream).await?;

    let mut result = state
        .batch
        .complete_batch(vec![(q.filename, outcome.size, outcome.etag, UploadMethod::StreamingProxy)])
        .await;

    match result.results.pop() {
        Some((_, BatchItemOutcome::Success { record })) => Ok(Json(ProxyUploadResponse {
            success: true,
            size: record.size,
            etag: record.etag,
            upload_method: UploadMethod::StreamingProxy.as_str(),
        })),
        Some((filename, BatchItemOutcome::Duplicate)) => Err(AppError::Duplicate { filename }),
        Some((filename, BatchItemOutcome::Error { message })) => Err(AppError::NotFoundAfterUpload(format!("{filename}: {message}"))),
        None => Err(AppError::InvariantViolation("batch completer returned no result for a single-item batch".to_string())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUrlRequest {
    pub filename: String,
    /// Accepted for API-table parity with spec.md §6 but unused: ZMP's
    /// advertised `available_slots`/`recommended_delay_ms` depend only on
    /// current concurrency, not the declared size of this particular file.
    #[serde(default)]
    #[allow(dead_code)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUrlResponse {
    pub success: bool,
    pub upload_url: String,
    pub available_slots: usize,
    pub recommended_delay_ms: u64,
}

pub async fn zero_memory_url(State(state): State<Arc<AppState>>, Json(req): Json<ProxyUrlRequest>) -> Json<ProxyUrlResponse> {
    let proxy_url = state.proxy.presign_proxy_url(&req.filename);
    Json(ProxyUrlResponse {
        success: true,
        upload_url: proxy_url.url,
        available_slots: proxy_url.available_slots,
        recommended_delay_ms: proxy_url.recommended_delay_ms,
    })
}
