//! Shared test harness: builds a full `AppState`/router pair against
//! `FakeBackend` so integration tests exercise the real HTTP surface
//! without a network listener or a real object store.

#![allow(dead_code)]

use sermon_uploader_core::api::{build_router, AppState};
use sermon_uploader_core::batch::BatchCompleter;
use sermon_uploader_core::completion::CompletionPipeline;
use sermon_uploader_core::config::Config;
use sermon_uploader_core::metrics::Metrics;
use sermon_uploader_core::multipart::MultipartManager;
use sermon_uploader_core::notify::LoggingSink;
use sermon_uploader_core::presign::PresignCoordinator;
use sermon_uploader_core::proxy::StreamingProxy;
use sermon_uploader_core::storage::fake::FakeBackend;
use std::sync::Arc;

pub struct Harness {
    pub router: axum::Router,
    pub backend: Arc<FakeBackend>,
}

/// Builds a router wired to a fresh `FakeBackend`, letting the caller tweak
/// `Config` away from its defaults (threshold, concurrency caps, etc).
pub fn build(configure: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::default();
    configure(&mut config);

    let fake = Arc::new(FakeBackend::new());
    let backend: Arc<dyn sermon_uploader_core::storage::StorageBackend> = fake.clone();

    let multipart = Arc::new(MultipartManager::new(
        backend.clone(),
        config.upload_max_concurrent,
        config.max_upload_bytes,
        config.session_timeout,
    ));
    let proxy = Arc::new(StreamingProxy::new(backend.clone(), config.upload_max_concurrent_proxy, "http://test.local".to_string()));
    let completion = Arc::new(CompletionPipeline::new(backend.clone()));
    let batch = Arc::new(BatchCompleter::new(completion.clone(), Arc::new(LoggingSink), config.batch_threshold));
    let presign = PresignCoordinator::new(backend.clone());

    let state = Arc::new(AppState {
        backend: backend.clone(),
        config,
        presign,
        multipart,
        proxy,
        completion,
        batch,
        metrics: Metrics::new(),
    });

    Harness { router: build_router(state), backend: fake }
}
