use axum::body::Body;
use axum::http::{Request, StatusCode, header};

use refrax_core::signature;

use super::test_utils::*;

#[tokio::test]
async fn transform_produces_then_serves_cached_with_revalidation() {
    let server = test_server(|_| {}).await;
    seed_object(&server, "public/sample.jpg", &sample_jpeg(), "image/jpeg").await;

    let response = get_with_accept(
        &server,
        "/t/w_64,h_64,c_fill/sample.jpg",
        "image/avif,image/webp,*/*",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("X-Savings-Percent"));
    assert!(response.headers().contains_key("X-Original-Size"));
    let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=31536000, must-revalidate"
    );
    let first_body = body_bytes(response).await;
    assert!(!first_body.is_empty());

    // Identical request: cache hit, byte-identical body, same ETag.
    let response = get_with_accept(
        &server,
        "/t/w_64,h_64,c_fill/sample.jpg",
        "image/avif,image/webp,*/*",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ETAG].to_str().unwrap(), etag);
    assert_eq!(body_bytes(response).await, first_body);

    // Revalidation with the ETag short-circuits.
    let response = request(
        &server,
        Request::get("/t/w_64,h_64,c_fill/sample.jpg")
            .header(header::ACCEPT, "image/avif,image/webp,*/*")
            .header(header::IF_NONE_MATCH, &etag)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn missing_original_is_404_and_bad_type_is_400() {
    let server = test_server(|_| {}).await;
    let response = get(&server, "/t/w_100/ghost.jpg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    seed_object(&server, "public/doc.pdf", b"%PDF-1.4 fake", "application/pdf").await;
    let response = get(&server, "/t/w_100/doc.pdf").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn head_probe_reports_without_producing() {
    let server = test_server(|_| {}).await;
    seed_object(&server, "public/pic.jpg", &sample_jpeg(), "image/jpeg").await;

    let response = request(
        &server,
        Request::head("/t/w_50/pic.jpg")
            .header(header::ACCEPT, "image/webp")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    // Not cached yet, and probing must not create the artifact.
    assert!(!response.headers().contains_key("X-Optimized-Size"));
    assert!(server.storage.list("cache/").await.unwrap().is_empty());
}

#[tokio::test]
async fn upload_roundtrip_and_suffixing() {
    let server = test_server(|_| {}).await;

    let body = multipart_body(&[("pic.png", "image/png", &sample_png())]);
    let req = Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body.clone()))
        .unwrap();
    let response = request(&server, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let parsed: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(parsed["files"][0]["path"], "pic.png");

    // Same name again: unique-path suffixing.
    let req = Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = request(&server, req).await;
    let parsed: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(parsed["files"][0]["path"], "pic (1).png");

    // The uploaded original is transformable.
    let response = get_with_accept(&server, "/t/w_32/pic.png", "image/webp").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn upload_rejections_are_400() {
    let server = test_server(|config| {
        config.upload.max_bytes = 128;
    })
    .await;

    // Oversize file.
    let big = vec![0u8; 256];
    let body = multipart_body(&[("big.png", "image/png", &big)]);
    let req = Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = request(&server, req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Disallowed extension.
    let body = multipart_body(&[("evil.exe", "application/octet-stream", b"MZ" as &[u8])]);
    let req = Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = request(&server, req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_key_gate_on_protected_routes() {
    let server = test_server(|config| {
        config.auth.api_keys = vec!["sekrit".to_string()];
    })
    .await;

    let response = request(
        &server,
        Request::delete("/invalidate/x.jpg")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = request(
        &server,
        Request::delete("/invalidate/x.jpg")
            .header("x-api-key", "wrong")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = request(
        &server,
        Request::delete("/invalidate/x.jpg")
            .header("x-api-key", "sekrit")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Transform endpoints stay public.
    seed_object(&server, "public/open.jpg", &sample_jpeg(), "image/jpeg").await;
    let response = get_with_accept(&server, "/t/w_32/open.jpg", "image/webp").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalidation_endpoint_reports_counts() {
    let server = test_server(|_| {}).await;
    seed_object(&server, "public/inv.jpg", &sample_jpeg(), "image/jpeg").await;
    get_with_accept(&server, "/t/w_40/inv.jpg", "image/webp").await;
    assert_eq!(server.storage.list("cache/").await.unwrap().len(), 1);

    let response = request(
        &server,
        Request::delete("/invalidate/inv.jpg")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(report["remote_deleted"], 1);
    assert!(server.storage.list("cache/").await.unwrap().is_empty());

    // Second call is a no-op, not an error.
    let response = request(
        &server,
        Request::delete("/invalidate/inv.jpg")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(report["remote_deleted"], 0);
}

#[tokio::test]
async fn storage_listing_and_metadata() {
    let server = test_server(|_| {}).await;
    seed_object(&server, "public/albums/a.jpg", &sample_jpeg(), "image/jpeg").await;
    seed_object(&server, "public/b.png", &sample_png(), "image/png").await;

    let response = get(&server, "/storage/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let tree: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(tree[0]["name"], "albums");
    assert_eq!(tree[0]["is_dir"], true);
    assert_eq!(tree[1]["name"], "b.png");

    let response = get(&server, "/storage/albums/a.jpg/metadata").await;
    assert_eq!(response.status(), StatusCode::OK);
    let meta: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(meta["path"], "albums/a.jpg");
    assert!(meta["size"].as_u64().unwrap() > 0);

    let response = get(&server, "/storage/ghost.png/metadata").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn asset_delete_cascades_across_tiers() {
    let server = test_server(|_| {}).await;
    seed_object(&server, "public/gone.jpg", &sample_jpeg(), "image/jpeg").await;
    get_with_accept(&server, "/t/w_40/gone.jpg", "image/webp").await;
    get_with_accept(&server, "/t/w_80/gone.jpg", "image/webp").await;

    let response = request(
        &server,
        Request::delete("/storage/gone.jpg")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(report["original_deleted"], true);
    assert_eq!(report["invalidation"]["remote_deleted"], 2);

    assert!(!server.storage.head("public/gone.jpg").await.unwrap());
    let response = get_with_accept(&server, "/t/w_40/gone.jpg", "image/webp").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signed_urls_verify_before_serving() {
    let server = test_server(|config| {
        config.auth.signature_secret = Some("test-secret".to_string());
    })
    .await;
    seed_object(&server, "public/signed.jpg", &sample_jpeg(), "image/jpeg").await;

    let sig = signature::sign("test-secret", "w_48", "signed.jpg").unwrap();
    let response =
        get_with_accept(&server, &format!("/s--{sig}/w_48/signed.jpg"), "image/webp").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get_with_accept(
        &server,
        "/s--0123456789abcdef/w_48/signed.jpg",
        "image/webp",
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong-length signatures are rejected up front.
    let response = get_with_accept(&server, "/s--abc/w_48/signed.jpg", "image/webp").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A non-signed marker is not a route.
    let response = get_with_accept(&server, "/x--abc/w_48/signed.jpg", "image/webp").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoints() {
    let server = test_server(|_| {}).await;
    let response = get(&server, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    // No database configured: database health is 503, and the queue
    // endpoints are 500-grade.
    let response = get(&server, "/health/database").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = request(
        &server,
        Request::get("/queue/stats").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
