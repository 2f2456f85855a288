//! Shared fixtures for router tests: local-backed state, sample media, and
//! request plumbing.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use refrax_config::{Config, StorageMode};
use refrax_core::storage::ObjectStore;

use crate::infra::startup::build_state;
use crate::routes::build_router;

pub struct TestServer {
    pub _dir: tempfile::TempDir,
    pub router: Router,
    pub storage: Arc<dyn ObjectStore>,
}

pub async fn test_server(mutate: impl FnOnce(&mut Config)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.mode = StorageMode::Local;
    config.storage.local_root = dir.path().join("store");
    config.cache.cache_dir = dir.path().join("cache");
    config.cache.public_dir = dir.path().join("public");
    config.cache.temp_dir = dir.path().join("temp");
    mutate(&mut config);

    let (state, _workers) = build_state(config).await.unwrap();
    let storage = Arc::clone(&state.storage);
    TestServer {
        _dir: dir,
        router: build_router(state),
        storage,
    }
}

pub async fn seed_object(server: &TestServer, key: &str, bytes: &[u8], content_type: &str) {
    server
        .storage
        .put(key, bytes, content_type, &HashMap::new())
        .await
        .unwrap();
}

pub fn sample_jpeg() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(160, 120, |x, y| {
        image::Rgb([(x * 3 % 255) as u8, (y * 5 % 255) as u8, 77])
    }));
    let mut buf = Vec::new();
    img.write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
        std::io::Cursor::new(&mut buf),
        90,
    ))
    .unwrap();
    buf
}

pub fn sample_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_fn(64, 64, |x, y| {
        image::Rgba([(x * 4) as u8, (y * 4) as u8, 128, 255])
    }));
    let mut buf = Vec::new();
    img.write_with_encoder(image::codecs::png::PngEncoder::new(std::io::Cursor::new(
        &mut buf,
    )))
    .unwrap();
    buf
}

pub async fn get(server: &TestServer, uri: &str) -> Response<Body> {
    request(server, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn get_with_accept(server: &TestServer, uri: &str, accept: &str) -> Response<Body> {
    request(
        server,
        Request::get(uri)
            .header(header::ACCEPT, accept)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn request(server: &TestServer, request: Request<Body>) -> Response<Body> {
    server.router.clone().oneshot(request).await.unwrap()
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

pub const MULTIPART_BOUNDARY: &str = "refrax-test-boundary";

/// Hand-rolled multipart body with one file field per entry.
pub fn multipart_body(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (filename, content_type, bytes) in files {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}
