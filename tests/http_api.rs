//! Integration tests for the HTTP surface, driven in-process through the router.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{
    body_bytes, body_json, build_test_app, get, png_fixture, post_multipart,
    post_multipart_streamed, post_raw, FailingRemover, Part, TopHalfRemover,
};
use tower::ServiceExt;

use rembg_server::OUTPUT_SIZE;

// ---------------------------------------------------------------------------
// POST /rembg: success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_upload_returns_fixed_size_png() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));
    let upload = png_fixture(300, 120);

    let response = post_multipart(app, &[Part::file("image", "photo.png", &upload)]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=\"processed_image.png\""
    );

    let png = body_bytes(response).await;
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!(decoded.color(), image::ColorType::Rgb8);

    let rgb = decoded.to_rgb8();
    assert_eq!(rgb.dimensions(), (OUTPUT_SIZE, OUTPUT_SIZE));
    // Top half kept, bottom half composited onto black.
    assert_eq!(rgb.get_pixel(112, 20).0, [30, 160, 90]);
    assert_eq!(rgb.get_pixel(112, 200).0, [0, 0, 0]);
}

#[tokio::test]
async fn jpeg_upload_is_accepted() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));
    let image = image::RgbImage::from_pixel(64, 48, image::Rgb([200, 200, 200]));
    let mut jpeg = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .unwrap();

    let response = post_multipart(app, &[Part::file("image", "photo.jpg", &jpeg)]).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn other_fields_are_ignored() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));
    let upload = png_fixture(10, 10);

    let response = post_multipart(
        app,
        &[
            Part::text("comment", b"hello"),
            Part::file("image", "a.png", &upload),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn output_is_deterministic() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));
    let upload = png_fixture(90, 60);

    let first = post_multipart(app.clone(), &[Part::file("image", "a.png", &upload)]).await;
    let second = post_multipart(app, &[Part::file("image", "a.png", &upload)]).await;

    assert_eq!(body_bytes(first).await, body_bytes(second).await);
}

// ---------------------------------------------------------------------------
// POST /rembg: client errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_image_field_is_bad_request() {
    let remover = Arc::new(TopHalfRemover::default());
    let app = build_test_app(remover.clone());
    let upload = png_fixture(10, 10);

    let response = post_multipart(app, &[Part::file("picture", "a.png", &upload)]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No image provided");
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn image_field_without_filename_counts_as_missing() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));
    let upload = png_fixture(10, 10);

    let response = post_multipart(app, &[Part::text("image", &upload)]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No image provided");
}

#[tokio::test]
async fn empty_filename_is_bad_request() {
    let remover = Arc::new(TopHalfRemover::default());
    let app = build_test_app(remover.clone());
    let upload = png_fixture(10, 10);

    let response = post_multipart(app, &[Part::file("image", "", &upload)]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No image selected");
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_multipart_body_is_bad_request() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));

    let response = post_multipart(app, &[]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No image provided");
}

#[tokio::test]
async fn non_multipart_body_is_bad_request() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));

    let response = post_raw(app, "application/json", br#"{"image": "abc"}"#.to_vec()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No image provided");
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_processing() {
    let remover = Arc::new(TopHalfRemover::default());
    let app = build_test_app(remover.clone());
    let body = common::multipart_body(&[Part::file("image", "big.png", &vec![0u8; 2 * 1024 * 1024])]);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/rembg")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", common::BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(
        body_json(response).await["error"],
        format!(
            "Upload exceeds the {} byte limit",
            common::test_config().max_upload_bytes
        )
    );
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn streamed_body_over_limit_before_image_part_is_payload_too_large() {
    let remover = Arc::new(TopHalfRemover::default());
    let app = build_test_app(remover.clone());
    let padding = vec![b'x'; 2 * 1024 * 1024];
    let upload = png_fixture(10, 10);
    let body = common::multipart_body(&[
        Part::text("notes", &padding),
        Part::file("image", "a.png", &upload),
    ]);

    let response = post_multipart_streamed(app, body).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().starts_with("Upload failed: "));
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// POST /rembg: processing failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn corrupt_image_is_internal_error() {
    let remover = Arc::new(TopHalfRemover::default());
    let app = build_test_app(remover.clone());

    let response = post_multipart(
        app,
        &[Part::file("image", "broken.png", b"\x89PNG\r\n\x1a\nthis is not a png")],
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Processing failed: "));
    assert_eq!(remover.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_file_is_internal_error() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));

    let response = post_multipart(app, &[Part::file("image", "empty.png", b"")]).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn remover_failure_is_internal_error() {
    let app = build_test_app(Arc::new(FailingRemover));
    let upload = png_fixture(20, 20);

    let response = post_multipart(app, &[Part::file("image", "a.png", &upload)]).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.starts_with("Processing failed: "));
    assert!(message.contains("model session unavailable"));
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));

    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn health_is_unaffected_by_failed_requests() {
    let app = build_test_app(Arc::new(FailingRemover));
    let upload = png_fixture(20, 20);

    let failed = post_multipart(app.clone(), &[Part::file("image", "a.png", &upload)]).await;
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let rejected = post_multipart(app.clone(), &[]).await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let response = get(app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));

    let response = get(app, "/health").await;

    let request_id = response.headers().get("x-request-id").unwrap();
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let app = build_test_app(Arc::new(TopHalfRemover::default()));

    let response = get(app, "/rembg").await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
