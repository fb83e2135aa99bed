//! Unified error taxonomy for the upload core (spec §7) and its HTTP
//! projection. Grounded on the teacher's `api/errors.rs` `S3Error` ↔
//! `IntoResponse` pattern, reshaped from XML to the JSON envelope spec §6
//! requires: `{success:true, ...}` / `{error:true, message, ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ClientInput(String),

    #[error("duplicate: {filename}")]
    Duplicate { filename: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no concurrency slots available, retry after {retry_after_secs}s")]
    Admission { retry_after_secs: u64 },

    #[error("upload session {0} is missing parts: {1:?}")]
    IncompleteUpload(String, Vec<u32>),

    #[error("object not found after upload: {0}")]
    NotFoundAfterUpload(String),

    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    #[error("object store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ClientInput(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Admission { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::IncompleteUpload(..) => StatusCode::BAD_REQUEST,
            AppError::NotFoundAfterUpload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Store(e) => e.status_code(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": true,
            "message": self.to_string(),
        });

        match &self {
            AppError::Duplicate { filename } => {
                body["isDuplicate"] = json!(true);
                body["filename"] = json!(filename);
            }
            AppError::Admission { retry_after_secs } => {
                body["retry_after"] = json!(retry_after_secs);
            }
            AppError::IncompleteUpload(_, missing) => {
                body["missingParts"] = json!(missing);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
