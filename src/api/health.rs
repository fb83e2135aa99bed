//! Liveness and Prometheus exposition endpoints. Grounded on the
//! teacher's `api/handlers/status.rs::health_check` and
//! `metrics.rs::metrics_handler`.

use super::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "success": true, "status": "ok" }))
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.refresh_gauges(&state.multipart, &state.proxy);
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, state.metrics.content_type())], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
