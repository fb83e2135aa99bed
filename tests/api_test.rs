//! End-to-end HTTP surface tests, driven through the real router against
//! `FakeBackend` (no network listener, no real object store).

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use sermon_uploader_core::storage::StorageBackend;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(router: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// S1: a small file with a public endpoint configured routes through the
/// presigned-public path.
#[tokio::test]
async fn small_file_with_public_endpoint_routes_to_presigned_public() {
    let harness = common::build(|cfg| {
        cfg.object_store.public_endpoint = Some("https://cdn.test".to_string());
        cfg.large_file_threshold_bytes = 100 * 1024 * 1024;
    });

    let (status, body) = send(
        harness.router,
        post_json("/upload/presigned", json!({"filename": "sermon.wav", "fileSize": 1024})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["uploadMethod"], json!("presigned_cloudflare"));
    assert!(body["uploadUrl"].as_str().unwrap().contains("public"));
}

/// S2: a file over the CDN-safe threshold but still small enough for a
/// single PUT is routed to a direct-endpoint presigned URL, not multipart.
#[tokio::test]
async fn large_file_under_single_part_cap_routes_to_direct_endpoint() {
    let harness = common::build(|cfg| {
        cfg.object_store.public_endpoint = Some("https://cdn.test".to_string());
        cfg.large_file_threshold_bytes = 100 * 1024 * 1024;
    });

    let (status, body) = send(
        harness.router,
        post_json("/upload/presigned", json!({"filename": "album.wav", "fileSize": 157_286_400u64})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isLargeFile"], json!(true));
    assert_eq!(body["uploadMethod"], json!("direct_object_store"));
    assert!(body["uploadUrl"].as_str().unwrap().contains("internal"));
}

/// A file over the single-part cap is directed at the multipart flow
/// instead.
#[tokio::test]
async fn file_over_single_part_cap_is_directed_to_multipart_init() {
    let harness = common::build(|cfg| {
        cfg.object_store.public_endpoint = Some("https://cdn.test".to_string());
        cfg.large_file_threshold_bytes = 1024;
        cfg.single_part_max_bytes = 1024 * 1024;
    });

    let (status, body) = send(
        harness.router,
        post_json("/upload/presigned", json!({"filename": "album.wav", "fileSize": 10 * 1024 * 1024})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isLargeFile"], json!(true));
    assert_eq!(body["multipartInitUrl"], json!("/upload/multipart/init"));
}

/// S3: a filename that already exists in the store is rejected as a
/// duplicate before a presigned URL is ever handed out.
#[tokio::test]
async fn duplicate_filename_is_rejected_with_409() {
    let harness = common::build(|_| {});
    harness.backend.seed("existing.wav", "already here");

    let (status, body) = send(
        harness.router,
        post_json("/upload/presigned", json!({"filename": "existing.wav", "fileSize": 1024})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["isDuplicate"], json!(true));
}

/// S4: a full multipart happy path — init, presign each part, complete.
#[tokio::test]
async fn multipart_happy_path_completes() {
    let harness = common::build(|_| {});

    let (status, init_body) = send(
        harness.router.clone(),
        post_json(
            "/upload/multipart/init",
            json!({"filename": "long-sermon.wav", "fileSize": 10 * 1024 * 1024, "fileHash": "hash-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let upload_id = init_body["uploadId"].as_str().unwrap().to_string();
    let total_parts = init_body["totalParts"].as_u64().unwrap();
    assert_eq!(total_parts, 2);

    let part_sizes = [5 * 1024 * 1024usize, 5 * 1024 * 1024usize];
    for part_number in 1..=total_parts {
        let uri = format!("/upload/multipart/presigned?uploadId={upload_id}&partNumber={part_number}");
        let req = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(harness.router.clone(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().unwrap().contains(&upload_id));

        // Parts are uploaded by the client straight to the object store, out
        // of band from this service; simulate that here via the fake's own
        // `put_part` instead of routing bytes through an HTTP endpoint.
        let size = part_sizes[(part_number - 1) as usize];
        harness
            .backend
            .put_part("long-sermon.wav", &upload_id, part_number as u32, Bytes::from(vec![0u8; size]))
            .await
            .unwrap();
    }

    let complete_body = json!({
        "uploadId": upload_id,
        "parts": [
            {"partNumber": 1, "etag": "e1", "size": 5 * 1024 * 1024},
            {"partNumber": 2, "etag": "e2", "size": 5 * 1024 * 1024},
        ],
    });
    let (status, body) = send(harness.router, post_json("/upload/multipart/complete", complete_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["size"], json!(10 * 1024 * 1024u64));
}

/// S5: completing with missing parts surfaces the gap instead of silently
/// finalizing a partial object.
#[tokio::test]
async fn multipart_complete_with_missing_parts_is_rejected() {
    let harness = common::build(|_| {});

    let (_, init_body) = send(
        harness.router.clone(),
        post_json(
            "/upload/multipart/init",
            json!({"filename": "gap.wav", "fileSize": 10 * 1024 * 1024, "fileHash": "hash-2"}),
        ),
    )
    .await;
    let upload_id = init_body["uploadId"].as_str().unwrap().to_string();

    let (status, body) = send(
        harness.router,
        post_json("/upload/multipart/complete", json!({"uploadId": upload_id, "parts": [{"partNumber": 1, "etag": "e1", "size": 5242880}]})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["missingParts"], json!([2]));
}

/// S6: admission back-pressure — a second concurrent multipart session is
/// rejected with 429 when the concurrency cap is exhausted.
#[tokio::test]
async fn multipart_admission_back_pressure_returns_429() {
    let harness = common::build(|cfg| cfg.upload_max_concurrent = 1);

    let (status, _) = send(
        harness.router.clone(),
        post_json("/upload/multipart/init", json!({"filename": "first.wav", "fileSize": 12 * 1024 * 1024, "fileHash": "h1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        harness.router,
        post_json("/upload/multipart/init", json!({"filename": "second.wav", "fileSize": 12 * 1024 * 1024, "fileHash": "h2"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["retry_after"].is_number());
}

/// S7: `{filenames:["a.wav","b.wav","c.wav"]}` where b.wav is missing
/// post-upload tallies `{success_count:2, duplicate_count:0, error_count:1}`
/// instead of failing the whole batch.
#[tokio::test]
async fn batch_completion_reports_mixed_outcomes() {
    let harness = common::build(|cfg| cfg.batch_threshold = 2);
    harness.backend.seed("a.wav", "a");
    harness.backend.seed("c.wav", "c");

    let body = json!({
        "filenames": [
            {"filename": "a.wav", "size": 1, "etag": "e1"},
            {"filename": "b.wav", "size": 1, "etag": "e2"},
            {"filename": "c.wav", "size": 1, "etag": "e3"},
        ],
    });
    let (status, body) = send(harness.router, post_json("/upload/complete-batch", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], json!(2));
    assert_eq!(body["duplicate_count"], json!(0));
    assert_eq!(body["error_count"], json!(1));
}

/// Completing the same filename twice within a batch surfaces the second
/// occurrence as a duplicate via CP's post-hoc re-check.
#[tokio::test]
async fn batch_completion_flags_repeated_filename_as_duplicate() {
    let harness = common::build(|cfg| cfg.batch_threshold = 2);
    harness.backend.seed("a.wav", "a");

    let body = json!({
        "filenames": [
            {"filename": "a.wav", "size": 1, "etag": "e1"},
            {"filename": "a.wav", "size": 1, "etag": "e1"},
        ],
    });
    let (status, body) = send(harness.router, post_json("/upload/complete-batch", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], json!(1));
    assert_eq!(body["duplicate_count"], json!(1));
}

/// S8: the zero-memory proxy requires Content-Length and reports the exact
/// byte count it wrote.
#[tokio::test]
async fn zero_memory_proxy_requires_content_length_and_reports_size() {
    let harness = common::build(|_| {});

    let missing_length = Request::builder()
        .method("PUT")
        .uri("/upload/zero-memory-proxy?filename=live.wav")
        .body(Body::from("hello world"))
        .unwrap();
    let response = harness.router.clone().oneshot(missing_length).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let payload = b"hello world".to_vec();
    let with_length = Request::builder()
        .method("PUT")
        .uri("/upload/zero-memory-proxy?filename=live.wav")
        .header("content-length", payload.len().to_string())
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, body) = send(harness.router, with_length).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["size"], json!(payload.len() as u64));
}

#[tokio::test]
async fn health_check_reports_ok() {
    let harness = common::build(|_| {});
    let req = Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(harness.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let harness = common::build(|_| {});
    let req = Request::builder().method("GET").uri("/metrics").body(Body::empty()).unwrap();
    let response = harness.router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("uploader_http_requests_total") || text.contains("uploader_process_start_time_seconds"));
}
