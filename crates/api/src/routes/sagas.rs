//! Saga start and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{CustomerId, Money, ProductId, SagaId};
use domain::{SagaState, SagaStatus};
use serde::Deserialize;
use store::Store;

use super::parse;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSagaRequest {
    pub customer_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub total_amount: i64,
}

impl StartSagaRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.customer_id.trim().is_empty() {
            return Err(ApiError::BadRequest("customerId must not be blank".into()));
        }
        if self.product_id.trim().is_empty() {
            return Err(ApiError::BadRequest("productId must not be blank".into()));
        }
        if self.quantity == 0 {
            return Err(ApiError::BadRequest("quantity must be positive".into()));
        }
        if self.total_amount <= 0 {
            return Err(ApiError::BadRequest("totalAmount must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

// -- Handlers --

/// POST /sagas: start an order saga.
#[tracing::instrument(skip(state, req))]
pub async fn start<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<SagaState>), ApiError> {
    req.validate()?;
    let saga = state
        .orchestrator
        .start_saga(
            CustomerId::new(req.customer_id),
            ProductId::new(req.product_id),
            req.quantity,
            Money::new(req.total_amount),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(saga)))
}

/// GET /sagas?status=: list sagas, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SagaState>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| parse::<SagaStatus>("saga status", raw))
        .transpose()?;
    Ok(Json(state.orchestrator.list_sagas(status).await?))
}

/// GET /sagas/{id}: current state of one saga.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaState>, ApiError> {
    let saga_id: SagaId = parse("saga id", &id)?;
    state
        .orchestrator
        .get_saga(saga_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))
}
