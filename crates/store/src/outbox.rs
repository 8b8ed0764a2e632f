//! Outbox records.

use chrono::{DateTime, Utc};
use common::{SAGA_COMMAND_TOPIC, SAGA_EVENT_TOPIC};
use domain::{DomainError, MessageType, SagaCommand, SagaEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate type used for commands emitted by the orchestrator.
pub const SAGA_AGGREGATE: &str = "Saga";

/// Publication status of an outbox row.
///
/// ```text
/// PENDING ──┬──► SENT
///           └──► FAILED ──(requeue)──► PENDING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "outbox status",
                value: other.to_string(),
            }),
        }
    }
}

/// An outgoing message written in the same transaction as the state change
/// that produced it.
///
/// Handlers only ever insert records; the relay is the only writer of
/// `status`, `retry_count` and `processed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate_type: String,
    /// Partition key on the broker.
    pub aggregate_id: String,
    pub event_type: MessageType,
    pub payload: serde_json::Value,
    pub topic: String,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Creates a new PENDING record.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl ToString,
        event_type: MessageType,
        payload: serde_json::Value,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.to_string(),
            event_type,
            payload,
            topic: topic.into(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// A command for the saga command topic, keyed by saga id.
    pub fn for_command(command: &SagaCommand) -> Result<Self, DomainError> {
        Ok(Self::new(
            SAGA_AGGREGATE,
            command.saga_id(),
            command.message_type(),
            command.to_payload()?,
            SAGA_COMMAND_TOPIC,
        ))
    }

    /// A participant reply for the saga event topic.
    ///
    /// Keyed by saga id so that every event of one saga reaches the
    /// orchestrator through the same partition, in order.
    pub fn for_event(aggregate_type: &str, event: &SagaEvent) -> Result<Self, DomainError> {
        Ok(Self::new(
            aggregate_type,
            event.saga_id(),
            event.message_type(),
            event.to_payload()?,
            SAGA_EVENT_TOPIC,
        ))
    }

    pub fn mark_sent(&mut self) {
        self.status = OutboxStatus::Sent;
        self.processed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self) {
        self.status = OutboxStatus::Failed;
        self.retry_count += 1;
    }
}
