//! Prometheus metrics for the upload core (spec.md §5's observability
//! surface is implicit, not explicit — this is the ambient stack the
//! teacher always carries regardless of spec non-goals). Grounded on the
//! teacher's `src/metrics.rs`: same `Registry`/`*Vec` construction idiom,
//! same `http_metrics_middleware` shape, same route classifier pattern,
//! rebuilt around upload-relevant series instead of delta-compression
//! ones.

use crate::multipart::MultipartManager;
use crate::proxy::StreamingProxy;
use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use std::sync::Arc;
use std::time::Instant;

use crate::api::AppState;

pub struct Metrics {
    registry: Registry,

    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub http_request_size_bytes: HistogramVec,
    pub http_response_size_bytes: HistogramVec,

    /// Current count of `active` multipart sessions (MSM).
    pub multipart_active_sessions: Gauge,
    /// Cumulative count of sessions dropped by the stale reaper.
    pub multipart_reaped_total: Gauge,

    /// ZMP's currently-available concurrency slots.
    pub proxy_available_slots: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let process_start_time_seconds =
            Gauge::new("uploader_process_start_time_seconds", "Unix timestamp the process started at").unwrap();
        let build_info = GaugeVec::new(Opts::new("uploader_build_info", "Build metadata, value always 1"), &["version"]).unwrap();

        let http_requests_total = IntCounterVec::new(
            Opts::new("uploader_http_requests_total", "Total HTTP requests by route and status"),
            &["method", "route", "status"],
        )
        .unwrap();
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("uploader_http_request_duration_seconds", "HTTP request latency").buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["method", "route"],
        )
        .unwrap();
        let http_request_size_bytes = HistogramVec::new(
            HistogramOpts::new("uploader_http_request_size_bytes", "HTTP request body size")
                .buckets(prometheus::exponential_buckets(1024.0, 4.0, 12).unwrap()),
            &["route"],
        )
        .unwrap();
        let http_response_size_bytes = HistogramVec::new(
            HistogramOpts::new("uploader_http_response_size_bytes", "HTTP response body size")
                .buckets(prometheus::exponential_buckets(64.0, 4.0, 10).unwrap()),
            &["route"],
        )
        .unwrap();

        let multipart_active_sessions =
            Gauge::new("uploader_multipart_active_sessions", "Currently active multipart sessions").unwrap();
        let multipart_reaped_total =
            Gauge::new("uploader_multipart_reaped_total", "Multipart sessions dropped by the stale reaper").unwrap();

        let proxy_available_slots =
            Gauge::new("uploader_proxy_available_slots", "ZMP concurrency slots currently free").unwrap();

        for collector in [
            Box::new(process_start_time_seconds.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(build_info.clone()),
            Box::new(http_requests_total.clone()),
            Box::new(http_request_duration_seconds.clone()),
            Box::new(http_request_size_bytes.clone()),
            Box::new(http_response_size_bytes.clone()),
            Box::new(multipart_active_sessions.clone()),
            Box::new(multipart_reaped_total.clone()),
            Box::new(proxy_available_slots.clone()),
        ] {
            registry.register(collector).expect("metric registration must not collide");
        }

        Self {
            registry,
            process_start_time_seconds,
            build_info,
            http_requests_total,
            http_request_duration_seconds,
            http_request_size_bytes,
            http_response_size_bytes,
            multipart_active_sessions,
            multipart_reaped_total,
            proxy_available_slots,
        }
    }

    /// Updates the on-demand gauges from live component state just before
    /// encoding; cheaper than pushing an update on every state mutation.
    pub fn refresh_gauges(&self, multipart: &Arc<MultipartManager>, proxy: &Arc<StreamingProxy>) {
        self.multipart_active_sessions.set(multipart.active_session_count() as f64);
        self.multipart_reaped_total.set(multipart.reaped_total() as f64);
        self.proxy_available_slots.set(proxy.available_slots() as f64);
    }

    pub fn content_type(&self) -> String {
        TEXT_FORMAT.to_string()
    }

    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifies a request path into a low-cardinality route label for
/// metrics, so `/upload/multipart/abort/<uuid>` doesn't explode the
/// `route` label's cardinality. Prefers axum's `MatchedPath` (the route
/// pattern, e.g. `/upload/multipart/abort/:upload_id`) and falls back to
/// the raw path only when no route matched (404s).
fn route_label<B>(req: &Request<B>) -> String {
    req.extensions().get::<MatchedPath>().map(|p| p.as_str().to_string()).unwrap_or_else(|| req.uri().path().to_string())
}

pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> impl IntoResponse {
    let method = req.method().to_string();
    let route = route_label(&req);
    let request_size = req.headers().get(axum::http::header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<f64>().ok());

    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed().as_secs_f64();

    let status = response.status().as_str().to_string();
    state.metrics.http_requests_total.with_label_values(&[&method, &route, &status]).inc();
    state.metrics.http_request_duration_seconds.with_label_values(&[&method, &route]).observe(elapsed);
    if let Some(size) = request_size {
        state.metrics.http_request_size_bytes.with_label_values(&[&route]).observe(size);
    }
    if let Some(size) = response.headers().get(axum::http::header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<f64>().ok()) {
        state.metrics.http_response_size_bytes.with_label_values(&[&route]).observe(size);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_collision() {
        let metrics = Metrics::new();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn encode_produces_prometheus_text_format() {
        let metrics = Metrics::new();
        metrics.http_requests_total.with_label_values(&["GET", "/health", "200"]).inc();
        let encoded = metrics.encode().unwrap();
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.contains("uploader_http_requests_total"));
    }
}
