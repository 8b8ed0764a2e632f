//! Outbox statistics, manual relay trigger and requeue of FAILED rows.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use messaging::RelayReport;
use serde::{Deserialize, Serialize};
use store::{OutboxRecord, OutboxStatus, OutboxStore, Store};
use uuid::Uuid;

use super::parse;
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxStats {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueResponse {
    pub id: Uuid,
    pub status: OutboxStatus,
}

/// GET /outbox/stats: row counts by status.
pub async fn stats<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<OutboxStats>, ApiError> {
    let store = &state.store;
    Ok(Json(OutboxStats {
        pending: store.count_by_status(OutboxStatus::Pending).await?,
        sent: store.count_by_status(OutboxStatus::Sent).await?,
        failed: store.count_by_status(OutboxStatus::Failed).await?,
    }))
}

/// GET /outbox?status=&limit=: rows with one status, oldest first.
/// Defaults to FAILED, the rows an operator may want to requeue.
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<OutboxRecord>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => parse::<OutboxStatus>("outbox status", raw)?,
        None => OutboxStatus::Failed,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Ok(Json(state.store.find_by_status(status, limit).await?))
}

/// POST /outbox/relay: run one relay cycle now.
#[tracing::instrument(skip(state))]
pub async fn relay<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<RelayReport>, ApiError> {
    Ok(Json(state.relay.relay_once().await?))
}

/// POST /outbox/{id}/requeue: FAILED → PENDING.
#[tracing::instrument(skip(state))]
pub async fn requeue<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<RequeueResponse>, ApiError> {
    let id: Uuid = parse("outbox id", &id)?;
    let record = state
        .store
        .get_outbox(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Outbox record {id} not found")))?;

    if !state.store.requeue(id).await? {
        return Err(ApiError::Conflict(format!(
            "Outbox record {id} is {}, only FAILED rows can be requeued",
            record.status
        )));
    }
    tracing::info!(retry_count = record.retry_count, "outbox record requeued");
    Ok(Json(RequeueResponse {
        id,
        status: OutboxStatus::Pending,
    }))
}
