//! Dead-lettered message review.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use store::{DeadLetterStore, FailedMessage, FailedMessageStatus, Store};
use uuid::Uuid;

use super::parse;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// GET /failed-messages?status=&topic=: dead-lettered messages, oldest first.
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<FailedMessage>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| parse::<FailedMessageStatus>("failed message status", raw))
        .transpose()?;
    let messages = state
        .store
        .find_failed_messages(status, query.topic.as_deref())
        .await?;
    Ok(Json(messages))
}

/// GET /failed-messages/{id}
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<FailedMessage>, ApiError> {
    let id: Uuid = parse("failed message id", &id)?;
    state
        .store
        .get_failed_message(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Failed message {id} not found")))
}

/// PUT /failed-messages/{id}/status: record the operator's follow-up.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn update_status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<FailedMessage>, ApiError> {
    let id: Uuid = parse("failed message id", &id)?;
    let status: FailedMessageStatus = parse("failed message status", &req.status)?;
    state
        .store
        .update_failed_message_status(id, status)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Failed message {id} not found")))
}
