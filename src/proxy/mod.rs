//! Proxy engine: ties routing, caching, auth, and the upstream client
//! together into the single request pipeline described in spec §4.5.
//!
//! Grounded on `original_source/controllers/gateway.py`'s
//! `GatewayController` (`process_request` → route match → cache check
//! for GET → forward → cache populate → return), generalized from its
//! FastAPI-specific `JSONResponse`/`StreamingResponse` split into one
//! uniform `ProxyOutcome` the web layer renders.

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;

use crate::cache::Cache;
use crate::errors::{AppError, AppResult};
use crate::routing::RouteTable;
use crate::upstream::UpstreamClient;

pub struct ProxyOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Set when a GET response was served from cache rather than
    /// forwarded, purely for logging/observability.
    pub served_from_cache: bool,
    /// Cache-key prefix to invalidate as a background task after the
    /// response is sent, for mutating methods (spec §4.3/§4.5) — the
    /// first path segment (e.g. `"users"` for `/api/users/42`), matched
    /// as a substring against every cached key rather than one exact
    /// key, so a write under a resource invalidates every cached GET
    /// under that resource.
    pub invalidate_key: Option<String>,
}

/// The resource segment a mutation invalidates: `/api/users/42` and
/// `/users/42` both yield `"users"` — a bare `api` prefix is skipped
/// since every route in `routes.yml` is mounted under it and it carries
/// no resource identity of its own. Falls back to the whole (trimmed)
/// path if it has no segments.
fn first_path_segment(path: &str) -> &str {
    let mut segments = path.trim_matches('/').split('/').filter(|s| !s.is_empty());
    match segments.next() {
        Some("api") => segments.next().unwrap_or("api"),
        Some(segment) => segment,
        None => path,
    }
}

#[cfg(test)]
mod segment_tests {
    use super::first_path_segment;

    #[test]
    fn strips_api_mount_prefix() {
        assert_eq!(first_path_segment("/api/users/42"), "users");
        assert_eq!(first_path_segment("/users/42"), "users");
        assert_eq!(first_path_segment("/api"), "api");
        assert_eq!(first_path_segment("/"), "/");
    }
}

pub struct ProxyEngine {
    routes: RouteTable,
    cache: Cache,
    upstream: UpstreamClient,
}

impl ProxyEngine {
    pub fn new(routes: RouteTable, cache: Cache, upstream: UpstreamClient) -> Self {
        Self {
            routes,
            cache,
            upstream,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub async fn process(
        &self,
        method: Method,
        path: &str,
        query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> AppResult<ProxyOutcome> {
        let upstream_base = self.routes.match_path(path).ok_or(AppError::RouteNotFound)?;

        let cache_key = Cache::key(method.as_str(), path, query);

        if method == Method::GET {
            if let Some(cached) = self.cache.get::<CachedResponse>(&cache_key).await {
                return Ok(ProxyOutcome {
                    status: StatusCode::OK,
                    headers: cached.headers(),
                    body: cached.body.into(),
                    served_from_cache: true,
                    invalidate_key: None,
                });
            }
        }

        let path_and_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };

        let response = self
            .upstream
            .request(method.clone(), upstream_base, &path_and_query, headers, body)
            .await?;

        if method == Method::GET && response.status == StatusCode::OK {
            let cached = CachedResponse {
                content_type: response
                    .headers
                    .get(axum::http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body: response.body.to_vec(),
            };
            self.cache.set(&cache_key, &cached).await;
        }

        let invalidate_key = if method != Method::GET {
            Some(first_path_segment(path).to_string())
        } else {
            None
        };

        Ok(ProxyOutcome {
            status: response.status,
            headers: response.headers,
            body: response.body,
            served_from_cache: false,
            invalidate_key,
        })
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedResponse {
    content_type: Option<String>,
    body: Vec<u8>,
}

impl CachedResponse {
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(ct) = &self.content_type {
            if let Ok(value) = ct.parse() {
                headers.insert(axum::http::header::CONTENT_TYPE, value);
            }
        }
        headers
    }
}
