//! Batch topic: raw record publishing and consumer totals.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use messaging::{BatchReport, Broker, ProducerRecord};
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BatchRecord {
    pub key: Option<String>,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct PublishBatchRequest {
    pub records: Vec<BatchRecord>,
}

#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub topic: String,
    pub published: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatsResponse {
    pub topic: String,
    #[serde(flatten)]
    pub totals: BatchReport,
}

/// POST /batch: publish records to the batch topic as given, blank ones
/// included.
#[tracing::instrument(skip(state, req), fields(records = req.records.len()))]
pub async fn publish<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PublishBatchRequest>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    if req.records.is_empty() {
        return Err(ApiError::BadRequest("records must not be empty".to_string()));
    }

    let topic = state.config.batch_topic.clone();
    let published = req.records.len();
    for record in req.records {
        let mut message = ProducerRecord::new(&topic, record.value);
        if let Some(key) = record.key {
            message = message.with_key(key);
        }
        state.broker.publish(message).await?;
    }

    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { topic, published })))
}

/// GET /batch/stats: totals of the batch consumer since start.
pub async fn stats<S: Store>(State(state): State<Arc<AppState<S>>>) -> Json<BatchStatsResponse> {
    Json(BatchStatsResponse {
        topic: state.config.batch_topic.clone(),
        totals: state.batch.snapshot(),
    })
}
