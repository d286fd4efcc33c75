//! Administrative HTTP handlers (spec §4.11).
//!
//! Grounded on `original_source/controllers/admin.py::AdminController.reset_circuit_breaker`:
//! substring match against registered circuit breaker hosts, force every
//! match closed, 404 if nothing matches.

use axum::extract::{Path, State};
use axum::response::IntoResponse;

use crate::errors::{AppError, AppResult};
use crate::web::AppState;
use crate::web::responses::ok;

pub async fn reset_circuit(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let matches: Vec<String> = state
        .breakers
        .list_hosts()
        .into_iter()
        .filter(|host| host.contains(&service_name))
        .collect();

    if matches.is_empty() {
        return Err(AppError::CircuitNotFound(service_name));
    }

    for host in &matches {
        state.breakers.get_or_create(host).force_closed();
        tracing::info!(host = %host, "circuit breaker reset via admin endpoint");
    }

    Ok(ok(serde_json::json!({
        "message": format!("Reset circuit breaker for {} services", matches.len()),
    })))
}
