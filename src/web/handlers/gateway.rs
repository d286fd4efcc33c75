//! The catch-all gateway handler: auth gate, rate limit, then hand off
//! to the [`ProxyEngine`] (spec §4.5).
//!
//! Grounded on `original_source/routes.py`'s per-method gateway routes
//! (`gateway_get`/`gateway_post`/...), collapsed into one handler
//! registered for every HTTP verb since axum's `any()` + the engine's
//! own `Method` branching covers the same ground without five near-
//! identical functions.

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::response::Response;
use std::net::SocketAddr;

use crate::errors::{AppError, AppResult};
use crate::web::AppState;
use crate::web::extractors::BearerToken;

/// 10MB, matching `request_size_middleware`'s cap — this is the same
/// request, already past that check by the time it reaches the handler.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub async fn proxy(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> AppResult<Response> {
    if !state.rate_limiter.check(addr.ip()) {
        return Err(AppError::RateLimited);
    }

    let (mut parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or("").to_string();

    if !crate::auth::TokenValidator::should_skip(&path) {
        let BearerToken(token) = BearerToken::from_request_parts(&mut parts, &state).await?;
        state.token_validator.validate(&token)?;
    }

    let headers = parts.headers;
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::Config(format!("reading request body: {e}")))?;

    let outcome = state
        .proxy
        .process(method.clone(), &path, &query, headers, body)
        .await?;

    if let Some(key) = outcome.invalidate_key.clone() {
        let proxy = state.proxy.clone();
        tokio::spawn(async move {
            proxy.invalidate(&key).await;
        });
    }

    let mut response = Response::builder().status(outcome.status);
    *response.headers_mut().unwrap() = outcome.headers;
    Ok(response.body(Body::from(outcome.body)).unwrap())
}
