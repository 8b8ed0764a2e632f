//! Order lookups.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use domain::{Order, SagaState};
use store::Store;

use super::parse;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /orders/{id}: load an order by id.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse("order id", &id)?;
    state
        .orders
        .get_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
}

/// GET /orders/{id}/saga: the saga driving an order.
#[tracing::instrument(skip(state))]
pub async fn saga<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaState>, ApiError> {
    let order_id: OrderId = parse("order id", &id)?;
    state
        .orchestrator
        .find_by_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No saga for order {id}")))
}
