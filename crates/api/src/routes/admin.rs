//! Broker introspection: topics, partitions and consumer group positions.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use messaging::{Broker, ConsumerGroupInfo, TopicInfo};
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /admin/topics
pub async fn list_topics<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.broker.list_topics().await?))
}

/// GET /admin/topics/{name}
pub async fn describe_topic<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<TopicInfo>, ApiError> {
    state
        .broker
        .describe_topic(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Topic {name} not found")))
}

/// GET /admin/consumer-groups
pub async fn list_consumer_groups<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.broker.list_consumer_groups().await?))
}

/// GET /admin/consumer-groups/{group}: committed offset and lag per partition.
pub async fn describe_consumer_group<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(group): Path<String>,
) -> Result<Json<ConsumerGroupInfo>, ApiError> {
    state
        .broker
        .describe_consumer_group(&group)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Consumer group {group} not found")))
}
