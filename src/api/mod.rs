//! HTTP surface (spec.md §6). `AppState` bundles every component the
//! handlers below delegate to; grounded on the teacher's
//! `api/handlers/mod.rs::AppState` (engine + multipart store + metrics
//! behind one shared, cloneable state struct handed to axum via
//! `with_state`).

pub mod complete;
pub mod health;
pub mod multipart;
pub mod presigned;
pub mod proxy;

use crate::batch::BatchCompleter;
use crate::completion::CompletionPipeline;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::multipart::MultipartManager;
use crate::presign::PresignCoordinator;
use crate::proxy::StreamingProxy;
use crate::storage::StorageBackend;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub backend: Arc<dyn StorageBackend>,
    pub config: Config,
    pub presign: PresignCoordinator,
    pub multipart: Arc<MultipartManager>,
    pub proxy: Arc<StreamingProxy>,
    pub completion: Arc<CompletionPipeline>,
    pub batch: Arc<BatchCompleter>,
    pub metrics: Metrics,
}

/// Builds the CORS layer from `cors_allowed_origins` (spec.md §6's CORS
/// contract). A literal `"*"` entry means permissive; anything else is
/// an explicit allow-list.
fn cors_layer(config: &Config) -> CorsLayer {
    let permissive = config.cors_allowed_origins.iter().any(|o| o == "*");
    let layer = if permissive {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };
    layer
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
        .expose_headers([axum::http::header::ETAG])
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes as usize;
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics_handler))
        .route("/upload/presigned", post(presigned::issue_presigned))
        .route("/upload/presigned-batch", post(presigned::issue_presigned_batch))
        .route("/upload/complete", post(complete::complete_upload))
        .route("/upload/complete-batch", post(complete::complete_batch))
        .route("/upload/multipart/init", post(multipart::init_session))
        .route("/upload/multipart/presigned", get(multipart::presign_part))
        .route("/upload/multipart/complete", post(multipart::complete_session))
        .route("/upload/multipart/abort/:upload_id", delete(multipart::abort_session))
        .route("/upload/multipart/sessions", get(multipart::list_sessions))
        .route("/upload/zero-memory-proxy", put(proxy::zero_memory_proxy))
        .route("/upload/zero-memory-url", post(proxy::zero_memory_url))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state.clone(), crate::metrics::http_metrics_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}
