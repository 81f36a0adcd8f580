#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use tower::ServiceExt;

use rembg_server::server::{self, AppState};
use rembg_server::{
    BackgroundRemover, ImageCodec, RembgError, RembgPipeline, Result, ServerConfig,
};

pub const BOUNDARY: &str = "rembg-test-boundary";

/// Keeps the top half of the image and clears the rest to transparent black
#[derive(Default)]
pub struct TopHalfRemover {
    pub calls: AtomicUsize,
}

impl BackgroundRemover for TopHalfRemover {
    fn remove(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let image = ImageCodec::decode_rgb(encoded)?;
        let height = image.height();
        let cutout = RgbaImage::from_fn(image.width(), height, |x, y| {
            if y < height / 2 {
                let [r, g, b] = image.get_pixel(x, y).0;
                Rgba([r, g, b, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        ImageCodec::encode_png(&DynamicImage::ImageRgba8(cutout))
    }
}

pub struct FailingRemover;

impl BackgroundRemover for FailingRemover {
    fn remove(&self, _encoded: &[u8]) -> Result<Vec<u8>> {
        Err(RembgError::inference("model session unavailable"))
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        max_upload_bytes: 1024 * 1024,
        ..ServerConfig::default()
    }
}

/// Full router, middleware included, around `remover`
pub fn build_test_app(remover: Arc<dyn BackgroundRemover>) -> Router {
    let state = AppState::new(RembgPipeline::new(remover));
    server::router(state, &test_config())
}

/// Solid-color PNG upload
pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([30, 160, 90]));
    ImageCodec::encode_png(&DynamicImage::ImageRgb8(image)).unwrap()
}

/// One multipart part
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, filename: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            filename: Some(filename),
            data,
        }
    }

    pub fn text(name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            filename: None,
            data,
        }
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match part.filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n",
                part.name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
        };
        body.extend_from_slice(disposition.as_bytes());
        if part.filename.is_some() {
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_multipart(app: Router, parts: &[Part<'_>]) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/rembg")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST a multipart body in 64 KiB chunks with no `Content-Length`
pub async fn post_multipart_streamed(app: Router, body: Vec<u8>) -> Response<Body> {
    let chunks: Vec<std::io::Result<Bytes>> = body
        .chunks(64 * 1024)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/rembg")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_raw(app: Router, content_type: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/rembg")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
