//! Health check HTTP handler (spec §4.11).
//!
//! Grounded on `original_source/controllers/health.py::HealthController.check_health`:
//! pings redis, probes every route's upstream `/health` (single attempt,
//! matching the original's `retries=1`), and reports circuit breaker
//! state per host. Overall status is `healthy` only when redis is
//! reachable and every probed upstream responded 200.

use std::collections::HashMap;

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::web::AppState;
use crate::web::responses::ok;

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    redis: &'static str,
    services: HashMap<String, ServiceStatus>,
    circuits: HashMap<String, CircuitStatus>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatus {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct CircuitStatus {
    status: crate::circuit_breaker::CircuitState,
    failures: u64,
    last_failure: Option<chrono::DateTime<chrono::Utc>>,
    recovery_time: u64,
}

/// Grounded on `original_source/controllers/health.py::check_health`:
/// both `services` and `circuits` are dicts keyed by upstream/host name,
/// not arrays — `services[name]` carries either `statusCode` (probe
/// succeeded) or `error` (probe request itself failed), and
/// `circuits[host]` mirrors the breaker's `status`/`failures`/
/// `last_failure`/`recovery_time` fields exactly.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let redis_ok = match state.redis.clone() {
        Some(mut conn) => redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok(),
        None => false,
    };

    let upstreams = state.proxy.routes().upstreams();
    let mut services = HashMap::with_capacity(upstreams.len());
    for upstream in upstreams {
        let probe = state
            .probe_client
            .get(format!("{}/health", upstream.trim_end_matches('/')))
            .send()
            .await;
        let report = match probe {
            Ok(resp) => {
                let code = resp.status().as_u16();
                ServiceStatus {
                    status: if resp.status().is_success() { "up" } else { "degraded" },
                    status_code: Some(code),
                    error: None,
                }
            }
            Err(e) => ServiceStatus {
                status: "down",
                status_code: None,
                error: Some(e.to_string()),
            },
        };
        services.insert(upstream, report);
    }

    let circuits: HashMap<String, CircuitStatus> = state
        .breakers
        .list_hosts()
        .into_iter()
        .map(|host| {
            let breaker = state.breakers.get_or_create(&host);
            let report = CircuitStatus {
                status: breaker.state(),
                failures: breaker.consecutive_failures(),
                last_failure: breaker.last_failure_at(),
                recovery_time: breaker.recovery_time_secs(),
            };
            (host, report)
        })
        .collect();

    let all_up = services.values().all(|s| s.status == "up");

    let status = if redis_ok && all_up { "healthy" } else { "degraded" };

    ok(HealthReport {
        status,
        redis: if redis_ok { "connected" } else { "disconnected" },
        services,
        circuits,
        timestamp: chrono::Utc::now(),
    })
}
