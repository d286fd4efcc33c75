//! HTTP middleware: cross-cutting concerns layered around every route
//! (logging, CORS, security headers, size limiting).
//!
//! Kept close to the teacher's `web/middleware.rs` shape; trimmed to
//! the subset that applies to a gateway (dropped the runtime-settings
//! conditional logging and metrics middlewares, which depended on
//! domain state this crate doesn't have).

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use super::responses::ApiResponse;

/// Rejects requests whose `Host` header isn't on the configured
/// allow-list, mirroring Starlette's `TrustedHostMiddleware`
/// (`original_source/main.py` wires it with `settings.ALLOWED_HOSTS`).
/// A missing `Host` header is rejected outright — HTTP/1.1 requires it.
pub async fn trusted_host_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let host = headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok());
    match host {
        Some(host) if state.rate_limit_config.is_host_allowed(host) => next.run(request).await,
        _ => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error("Invalid host header".to_string())),
        )
            .into_response(),
    }
}

/// Tags every request with a UUID and logs method/path/status/duration
/// (spec §4.9).
pub async fn request_logging_middleware(method: Method, uri: Uri, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    info!(method = %method, uri = %uri, request_id = %request_id, "request started");

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration = start.elapsed();

    if status >= 400 {
        warn!(method = %method, uri = %uri, status, request_id = %request_id, duration_ms = duration.as_millis(), "request completed with error");
    } else {
        info!(method = %method, uri = %uri, status, request_id = %request_id, duration_ms = duration.as_millis(), "request completed");
    }

    response
}

/// Rejects bodies over 10MB before they reach a handler.
pub async fn request_size_middleware(headers: HeaderMap, request: Request, next: Next) -> Response {
    const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

    if let Some(content_length) = headers.get("content-length")
        && let Ok(length_str) = content_length.to_str()
        && let Ok(length) = length_str.parse::<usize>()
        && length > MAX_REQUEST_SIZE
    {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ApiResponse::<()>::error(format!(
                "request too large: {length} bytes (max: {MAX_REQUEST_SIZE})"
            ))),
        )
            .into_response();
    }

    next.run(request).await
}

/// CORS for the gateway's own admin/health surface.
pub async fn cors_middleware(method: Method, _headers: HeaderMap, request: Request, next: Next) -> Response {
    if method == Method::OPTIONS {
        return Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, PATCH, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
            .header("Access-Control-Max-Age", "3600")
            .body(Body::empty())
            .unwrap();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", "*".parse().unwrap());
    headers.insert(
        "Access-Control-Allow-Methods",
        "GET, POST, PUT, DELETE, PATCH, OPTIONS".parse().unwrap(),
    );
    headers.insert("Access-Control-Allow-Headers", "Content-Type, Authorization".parse().unwrap());

    response
}

/// Baseline security headers on every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("Referrer-Policy", "strict-origin-when-cross-origin".parse().unwrap());
    response
}
