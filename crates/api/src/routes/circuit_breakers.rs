//! Circuit-breaker status and manual overrides.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use messaging::{CircuitBreaker, CircuitBreakerStatus};
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

fn breaker<S: Store>(state: &AppState<S>, name: &str) -> Result<Arc<CircuitBreaker>, ApiError> {
    state
        .breakers
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("Circuit breaker {name} not found")))
}

/// GET /circuit-breakers: state and window metrics of every breaker.
pub async fn list<S: Store>(State(state): State<Arc<AppState<S>>>) -> Json<Vec<CircuitBreakerStatus>> {
    Json(state.breakers.all().iter().map(|b| b.status()).collect())
}

/// GET /circuit-breakers/{name}
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<CircuitBreakerStatus>, ApiError> {
    Ok(Json(breaker(&state, &name)?.status()))
}

/// POST /circuit-breakers/{name}/reset: back to CLOSED with an empty window.
#[tracing::instrument(skip(state))]
pub async fn reset<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<CircuitBreakerStatus>, ApiError> {
    let breaker = breaker(&state, &name)?;
    breaker.reset();
    tracing::warn!("circuit breaker reset by operator");
    Ok(Json(breaker.status()))
}

/// POST /circuit-breakers/{name}/force-open: reject every call until closed.
#[tracing::instrument(skip(state))]
pub async fn force_open<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<CircuitBreakerStatus>, ApiError> {
    let breaker = breaker(&state, &name)?;
    breaker.force_open();
    tracing::warn!("circuit breaker forced open by operator");
    Ok(Json(breaker.status()))
}

/// POST /circuit-breakers/{name}/close
#[tracing::instrument(skip(state))]
pub async fn close<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<CircuitBreakerStatus>, ApiError> {
    let breaker = breaker(&state, &name)?;
    breaker.close();
    tracing::warn!("circuit breaker closed by operator");
    Ok(Json(breaker.status()))
}
