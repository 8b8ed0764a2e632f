//! Stock initialization and lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::ProductId;
use domain::Inventory;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeInventoryRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryResponse {
    #[serde(flatten)]
    pub inventory: Inventory,
    pub available_quantity: u32,
}

impl From<Inventory> for InventoryResponse {
    fn from(inventory: Inventory) -> Self {
        Self {
            available_quantity: inventory.available_quantity(),
            inventory,
        }
    }
}

/// POST /inventory: set the stock of a product, replacing any previous level.
#[tracing::instrument(skip(state, req), fields(product_id = %req.product_id, quantity = req.quantity))]
pub async fn initialize<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<InitializeInventoryRequest>,
) -> Result<(StatusCode, Json<InventoryResponse>), ApiError> {
    if req.product_id.trim().is_empty() {
        return Err(ApiError::BadRequest("productId must not be blank".into()));
    }
    let inventory = state
        .inventory
        .initialize_inventory(ProductId::new(req.product_id), req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(inventory.into())))
}

/// GET /inventory/{productId}: stock level of one product.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
) -> Result<Json<InventoryResponse>, ApiError> {
    state
        .inventory
        .get_inventory(&ProductId::new(product_id.as_str()))
        .await?
        .map(|inventory| Json(inventory.into()))
        .ok_or_else(|| ApiError::NotFound(format!("Inventory for {product_id} not found")))
}
