//! Upstream HTTP client: header stripping, retry with exponential
//! backoff, and circuit-breaker admission around every outbound call
//! (spec §4.2, §4.5).
//!
//! Grounded on `original_source/services/http_client.py::HttpClientManager.request`
//! (same retry loop shape: check breaker, issue request, record
//! success/failure, backoff `backoff_factor * 2^attempt` between
//! attempts) and on the teacher's `reqwest::Client` usage for outbound
//! calls (`crates/m3u-proxy` builds one shared client and reuses it
//! across requests rather than constructing one per call).

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use bytes::Bytes;

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::config::UpstreamConfig;
use crate::errors::{AppError, AppResult};

/// Headers that must never be forwarded to the upstream verbatim —
/// they describe the inbound connection, not the proxied request
/// (spec §4.2 invariant, §8 testable property #9).
const STRIPPED_HEADERS: [&str; 3] = ["host", "connection", "content-length"];

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    breakers: Arc<CircuitBreakerRegistry>,
    retry_count: u32,
    retry_backoff: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, breakers: Arc<CircuitBreakerRegistry>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("building upstream http client: {e}")))?;
        Ok(Self {
            http,
            breakers,
            retry_count: config.retry_count.max(1),
            retry_backoff: Duration::from_secs_f64(config.retry_backoff_secs.max(0.0)),
        })
    }

    /// Strip connection-scoped headers before forwarding.
    pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::new();
        for (name, value) in headers.iter() {
            if STRIPPED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            out.insert(name.clone(), value.clone());
        }
        out
    }

    /// Issue `method path` against `upstream_base`, retrying transport
    /// failures and 5xx upstream responses with exponential backoff,
    /// gated by that host's circuit breaker on every attempt.
    pub async fn request(
        &self,
        method: Method,
        upstream_base: &str,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> AppResult<UpstreamResponse> {
        let host = host_of(upstream_base);
        let breaker = self.breakers.get_or_create(&host);
        let url = format!("{}{}", upstream_base.trim_end_matches('/'), path_and_query);
        let forwarded = Self::filter_headers(&headers);

        let mut last_transport_error: Option<String> = None;
        let mut last_status_response: Option<UpstreamResponse> = None;

        for attempt in 0..self.retry_count {
            if !breaker.admit() {
                return Err(AppError::UpstreamCircuitOpen {
                    host,
                    retry_after_secs: breaker.retry_after_secs(),
                });
            }

            let request = self
                .http
                .request(method.clone(), &url)
                .headers(forwarded.clone())
                .body(body.clone())
                .build()
                .map_err(|e| AppError::Config(format!("building upstream request: {e}")))?;

            match self.http.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        breaker.on_failure();
                        let response_headers = response.headers().clone();
                        let content_type = response_headers
                            .get(axum::http::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let body = response.bytes().await.unwrap_or_default();
                        last_status_response = Some(UpstreamResponse {
                            status,
                            headers: to_axum_headers(&response_headers),
                            body: body.clone(),
                        });
                        let _ = content_type;
                    } else {
                        breaker.on_success();
                        let response_headers = to_axum_headers(response.headers());
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| AppError::Config(format!("reading upstream body: {e}")))?;
                        return Ok(UpstreamResponse {
                            status,
                            headers: response_headers,
                            body,
                        });
                    }
                }
                Err(e) => {
                    breaker.on_failure();
                    last_transport_error = Some(e.to_string());
                }
            }

            if attempt + 1 < self.retry_count {
                let wait = self.retry_backoff.mul_f64(2f64.powi(attempt as i32));
                tokio::time::sleep(wait).await;
            }
        }

        // The last attempt may have just tripped the breaker open — if
        // so that takes priority over whatever the attempt itself
        // returned (spec §4.2 step 3: open breaker means
        // service-unavailable, not a bad-gateway/status passthrough).
        if breaker.state() == CircuitState::Open {
            return Err(AppError::UpstreamCircuitOpen {
                host,
                retry_after_secs: breaker.retry_after_secs(),
            });
        }

        if let Some(response) = last_status_response {
            return Err(AppError::UpstreamStatus {
                status: response.status,
                body: response.body,
                content_type: response
                    .headers
                    .get(axum::http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            });
        }

        tracing::warn!(
            host = %host,
            error = ?last_transport_error,
            attempts = self.retry_count,
            "upstream unavailable after retries"
        );
        Err(AppError::UpstreamTransport {
            host,
            attempts: self.retry_count,
        })
    }
}

fn to_axum_headers(headers: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
            if let Ok(value) = axum::http::HeaderValue::from_bytes(value.as_bytes()) {
                out.insert(name, value);
            }
        }
    }
    out
}

/// Extract the host (and port, if present) component from an upstream
/// base URL for use as the circuit breaker registry key.
fn host_of(upstream_base: &str) -> String {
    upstream_base
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(upstream_base)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_connection_scoped_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "inbound.example".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("content-length", "12".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());

        let filtered = UpstreamClient::filter_headers(&headers);
        assert!(!filtered.contains_key("host"));
        assert!(!filtered.contains_key("connection"));
        assert!(!filtered.contains_key("content-length"));
        assert!(filtered.contains_key("x-request-id"));
    }

    #[test]
    fn host_of_strips_scheme_and_path() {
        assert_eq!(host_of("http://svc.internal:8080"), "svc.internal:8080");
        assert_eq!(host_of("https://svc.internal/"), "svc.internal");
    }
}
