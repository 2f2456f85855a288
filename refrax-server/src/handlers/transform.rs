//! The transform endpoints: `GET/HEAD /t/...` and the signed
//! `/s--<sig>/...` variant.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Response;

use refrax_core::pipeline::{ClientContext, Delivery, ProbeReply, VideoStatus, parser};
use refrax_core::signature;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

const CACHE_CONTROL_PUBLIC: &str = "public, max-age=31536000, must-revalidate";

pub async fn transform_handler(
    State(state): State<AppState>,
    method: Method,
    Path(rest): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    serve(&state, method, &rest, &headers).await
}

/// `/s--<sig>/<params>/<file>`: verify the HMAC before any work. The first
/// segment must carry the `s--` marker; anything else is not a signed URL.
pub async fn signed_transform_handler(
    State(state): State<AppState>,
    method: Method,
    Path((marker, rest)): Path<(String, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let Some(sig) = marker.strip_prefix("s--") else {
        return Err(AppError::not_found("no such route"));
    };
    let secret = state
        .config
        .auth
        .signature_secret
        .as_deref()
        .ok_or_else(|| AppError::not_found("signed URLs are not enabled"))?;

    let (transformations, file_path) = split_transformations(&rest);
    signature::verify(secret, sig, transformations, &file_path)?;

    serve(&state, method, &rest, &headers).await
}

async fn serve(
    state: &AppState,
    method: Method,
    rest: &str,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let client = client_context(headers);

    if method == Method::HEAD {
        let reply = state.pipeline.probe(rest, &client).await?;
        return Ok(render_probe(reply));
    }

    let delivery = state.pipeline.handle(rest, &client).await?;
    Ok(render_delivery(delivery, headers))
}

fn client_context(headers: &HeaderMap) -> ClientContext {
    ClientContext {
        accept: header_string(headers, header::ACCEPT),
        user_agent: header_string(headers, header::USER_AGENT),
    }
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn render_delivery(delivery: Delivery, request_headers: &HeaderMap) -> Response {
    // Revalidation: a matching ETag short-circuits to 304.
    if !delivery.no_store {
        let matches = request_headers
            .get(header::IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|inm| inm == delivery.etag || inm == "*");
        if matches {
            return base_headers(
                Response::builder().status(StatusCode::NOT_MODIFIED),
                &delivery,
            )
            .body(Body::empty())
            .expect("static response build");
        }
    }

    let mut builder = base_headers(Response::builder().status(StatusCode::OK), &delivery);
    builder = builder.header(header::CONTENT_TYPE, delivery.content_type.clone());

    if let Some(metrics) = &delivery.optimization {
        builder = builder
            .header("X-Original-Size", metrics.original_size.to_string())
            .header("X-Optimized-Size", metrics.optimized_size.to_string())
            .header("X-Savings-Percent", format!("{:.1}", metrics.savings_percent))
            .header(
                "X-Compression-Ratio",
                format!("{:.2}", metrics.compression_ratio),
            );
    }

    builder
        .body(Body::from(delivery.bytes))
        .expect("response build")
}

fn base_headers(
    mut builder: axum::http::response::Builder,
    delivery: &Delivery,
) -> axum::http::response::Builder {
    builder = builder.header(header::ETAG, delivery.etag.clone());
    builder = if delivery.no_store {
        builder.header(header::CACHE_CONTROL, "no-store")
    } else {
        builder.header(header::CACHE_CONTROL, CACHE_CONTROL_PUBLIC)
    };
    if let Some(status) = delivery.video_status {
        builder = builder.header("X-Video-Status", video_status_str(status));
    }
    builder
}

fn render_probe(reply: ProbeReply) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(etag) = &reply.etag {
        builder = builder.header(header::ETAG, etag.clone());
    }
    if let Some(content_type) = &reply.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type.clone());
    }
    if let Some(size) = reply.size {
        builder = builder.header("X-Optimized-Size", size.to_string());
    }
    if let Some(status) = reply.video_status {
        builder = builder.header("X-Video-Status", video_status_str(status));
    }
    if reply.cached {
        builder = builder.header(header::CACHE_CONTROL, CACHE_CONTROL_PUBLIC);
    }
    builder.body(Body::empty()).expect("probe response build")
}

fn video_status_str(status: VideoStatus) -> &'static str {
    match status {
        VideoStatus::Ready => "ready",
        VideoStatus::Processing => "processing",
    }
}

/// Split the raw remainder into (transformations, file path) for signature
/// verification; the signed message uses the directives exactly as they
/// appear in the URL.
fn split_transformations(rest: &str) -> (&str, String) {
    let trimmed = rest.trim_start_matches('/');
    if let Some((first, tail)) = trimmed.split_once('/') {
        if parser::is_directive_segment(first) {
            return (first, tail.to_string());
        }
    }
    ("", trimmed.to_string())
}
