//! Error type definitions for the gateway.
//!
//! Mirrors the error taxonomy the gateway must surface to clients: each
//! variant maps to exactly one documented status/body pair.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Top-level application error type.
///
/// Every lower-layer error the proxy engine can encounter is mapped into
/// one of these variants before it reaches a client; nothing unclassified
/// escapes as a bare 500.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed `Authorization` header, or a rejected token.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// No route predicate matched the request path.
    #[error("no route found")]
    RouteNotFound,

    /// All retries exhausted with a transport error (breaker closed).
    #[error("service {host} unavailable after {attempts} attempts")]
    UpstreamTransport { host: String, attempts: u32 },

    /// The breaker denied `admit()` for this upstream.
    #[error("service {host} is unavailable, retry in {retry_after_secs}s")]
    UpstreamCircuitOpen { host: String, retry_after_secs: u64 },

    /// Upstream responded but retries were exhausted on 5xx status —
    /// propagate its status and body verbatim.
    #[error("upstream returned {status}")]
    UpstreamStatus {
        status: StatusCode,
        body: bytes::Bytes,
        content_type: Option<String>,
    },

    /// `routes.yml` failed to load or parse, or a required env var failed
    /// to parse into its typed field.
    #[error("configuration error: {0}")]
    Config(String),

    /// No circuit breaker's host contains the requested service name.
    #[error("no circuit breaker found for service: {0}")]
    CircuitNotFound(String),

    /// The client's per-IP quota was exhausted (spec §4.10).
    #[error("rate limit exceeded")]
    RateLimited,
}

/// Authentication-specific failures (spec §4.6/§4.7).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or invalid Authorization header")]
    MissingOrMalformed,
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

#[derive(Serialize)]
struct Detail {
    detail: String,
}

#[derive(Serialize)]
struct NotFoundBody {
    status: u16,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Auth(AuthError::MissingOrMalformed) => (
                StatusCode::UNAUTHORIZED,
                Json(Detail {
                    detail: "Missing or invalid Authorization header".to_string(),
                }),
            )
                .into_response(),
            AppError::Auth(AuthError::Expired) => (
                StatusCode::UNAUTHORIZED,
                Json(Detail {
                    detail: "expired".to_string(),
                }),
            )
                .into_response(),
            AppError::Auth(AuthError::Invalid) => (
                StatusCode::UNAUTHORIZED,
                Json(Detail {
                    detail: "invalid".to_string(),
                }),
            )
                .into_response(),
            AppError::RouteNotFound => (
                StatusCode::NOT_FOUND,
                Json(NotFoundBody {
                    status: 404,
                    message: "No route found".to_string(),
                }),
            )
                .into_response(),
            AppError::UpstreamTransport { host, attempts } => (
                StatusCode::BAD_GATEWAY,
                Json(Detail {
                    detail: format!("Service {host} unavailable after {attempts} attempts"),
                }),
            )
                .into_response(),
            AppError::UpstreamCircuitOpen {
                host,
                retry_after_secs,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Detail {
                    detail: format!(
                        "Service {host} is unavailable. Will retry in {retry_after_secs}s"
                    ),
                }),
            )
                .into_response(),
            AppError::UpstreamStatus {
                status,
                body,
                content_type,
            } => {
                let mut builder = Response::builder().status(status);
                if let Some(ct) = content_type {
                    builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
                }
                builder
                    .body(axum::body::Body::from(body))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            AppError::Config(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Detail {
                    detail: format!("Gateway error: {message}"),
                }),
            )
                .into_response(),
            AppError::CircuitNotFound(service) => (
                StatusCode::NOT_FOUND,
                Json(Detail {
                    detail: format!("No circuit found for service: {service}"),
                }),
            )
                .into_response(),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(Detail {
                    detail: "Rate limit exceeded".to_string(),
                }),
            )
                .into_response(),
        }
    }
}

/// Lets `AuthError` be used directly as an extractor rejection type.
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::Auth(self).into_response()
    }
}
