//! Web layer: shared application state and router assembly.
//!
//! Grounded on the teacher's `web/mod.rs` `AppState`-plus-`Router`
//! wiring pattern, replaced with the gateway's own set of shared
//! services (route table, cache, circuit breaker registry, rate
//! limiter, token validator) in place of the teacher's
//! repository/plugin-manager state.

pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod responses;

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get, post};
use tower_http::trace::TraceLayer;

use crate::auth::TokenValidator;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::{Config, RateLimitConfig};
use crate::proxy::ProxyEngine;
use crate::rate_limit::SharedRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyEngine>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub token_validator: Arc<TokenValidator>,
    pub rate_limiter: SharedRateLimiter,
    pub redis: Option<redis::aio::ConnectionManager>,
    pub probe_client: reqwest::Client,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

pub fn build_router(state: AppState, _config: &Config) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/admin/reset-circuit/{service_name}",
            post(handlers::admin::reset_circuit),
        )
        .fallback(any(handlers::gateway::proxy))
        .layer(axum::middleware::from_fn(middleware::security_headers_middleware))
        .layer(axum::middleware::from_fn(middleware::request_size_middleware))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::trusted_host_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::cors_middleware))
        .layer(axum::middleware::from_fn(middleware::request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
