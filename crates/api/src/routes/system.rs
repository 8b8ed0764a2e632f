//! Health and Prometheus metrics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use messaging::CircuitState;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use store::Store;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker_available: bool,
    /// Names of breakers that are currently not CLOSED.
    pub open_circuit_breakers: Vec<String>,
}

/// GET /health: returns liveness plus broker and breaker health.
///
/// The process is considered up as long as it answers; a down broker or an
/// open breaker only degrades the status.
pub async fn check<S: Store>(State(state): State<Arc<AppState<S>>>) -> Json<HealthResponse> {
    let open_circuit_breakers: Vec<String> = state
        .breakers
        .all()
        .iter()
        .filter(|breaker| breaker.state() != CircuitState::Closed)
        .map(|breaker| breaker.name().to_string())
        .collect();
    let broker_available = state.broker.is_available();

    let status = if broker_available && open_circuit_breakers.is_empty() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        broker_available,
        open_circuit_breakers,
    })
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
