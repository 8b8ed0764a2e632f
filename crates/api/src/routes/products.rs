//! Product registration.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::PRODUCT_TOPIC;
use domain::Product;
use serde::Serialize;
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductAccepted {
    pub product_id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub topic: String,
    pub ingested: u64,
}

/// POST /products: publish a product registration to `product-topic`.
#[tracing::instrument(skip(state, product), fields(product_id = %product.product_id))]
pub async fn register<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(product): Json<Product>,
) -> Result<(StatusCode, Json<ProductAccepted>), ApiError> {
    let metadata = state.products.register(&product).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ProductAccepted {
            product_id: product.product_id.to_string(),
            topic: PRODUCT_TOPIC.to_string(),
            partition: metadata.partition,
            offset: metadata.offset,
        }),
    ))
}

/// GET /products/stats: registrations consumed so far.
pub async fn stats<S: Store>(State(state): State<Arc<AppState<S>>>) -> Json<IngestStats> {
    Json(IngestStats {
        topic: state.config.ingestion_topic.clone(),
        ingested: state.ingest.ingested(),
    })
}
