//! Dead-letter records for messages that exhausted their retries.

use chrono::{DateTime, Utc};
use domain::DomainError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Follow-up status of a dead-lettered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailedMessageStatus {
    /// Awaiting manual or automated follow-up.
    #[default]
    Pending,
    /// Re-submitted for processing.
    Retried,
    /// Handled successfully after the fact.
    Resolved,
    /// Deliberately left unprocessed.
    Ignored,
}

impl FailedMessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailedMessageStatus::Pending => "PENDING",
            FailedMessageStatus::Retried => "RETRIED",
            FailedMessageStatus::Resolved => "RESOLVED",
            FailedMessageStatus::Ignored => "IGNORED",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            FailedMessageStatus::Resolved | FailedMessageStatus::Ignored
        )
    }
}

impl std::fmt::Display for FailedMessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FailedMessageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FailedMessageStatus::Pending),
            "RETRIED" => Ok(FailedMessageStatus::Retried),
            "RESOLVED" => Ok(FailedMessageStatus::Resolved),
            "IGNORED" => Ok(FailedMessageStatus::Ignored),
            other => Err(DomainError::UnknownVariant {
                kind: "failed message status",
                value: other.to_string(),
            }),
        }
    }
}

/// A message persisted from a `<topic>.DLT` destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMessage {
    pub id: Uuid,
    pub original_topic: String,
    pub partition_id: i32,
    pub offset_id: i64,
    pub message_key: Option<String>,
    pub message_value: String,
    pub error_message: Option<String>,
    pub status: FailedMessageStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl FailedMessage {
    pub fn new(
        original_topic: impl Into<String>,
        partition_id: i32,
        offset_id: i64,
        message_key: Option<String>,
        message_value: impl Into<String>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_topic: original_topic.into(),
            partition_id,
            offset_id,
            message_key,
            message_value: message_value.into(),
            error_message,
            status: FailedMessageStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            retry_count: 0,
        }
    }

    /// Applies an operator status change.
    pub fn apply_status(&mut self, status: FailedMessageStatus) {
        match status {
            FailedMessageStatus::Retried => self.retry_count += 1,
            FailedMessageStatus::Resolved | FailedMessageStatus::Ignored => {
                self.resolved_at.get_or_insert_with(Utc::now);
            }
            FailedMessageStatus::Pending => self.resolved_at = None,
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> FailedMessage {
        FailedMessage::new(
            "product-topic",
            1,
            42,
            Some("SKU-1".to_string()),
            "",
            Some("payload is blank".to_string()),
        )
    }

    #[test]
    fn new_message_is_pending() {
        let message = message();
        assert_eq!(message.status, FailedMessageStatus::Pending);
        assert_eq!(message.retry_count, 0);
        assert!(message.resolved_at.is_none());
    }

    #[test]
    fn retry_increments_count_and_resolve_stamps_time() {
        let mut message = message();
        message.apply_status(FailedMessageStatus::Retried);
        message.apply_status(FailedMessageStatus::Retried);
        assert_eq!(message.retry_count, 2);
        assert!(message.resolved_at.is_none());

        message.apply_status(FailedMessageStatus::Resolved);
        assert!(message.status.is_closed());
        assert!(message.resolved_at.is_some());
    }

    #[test]
    fn reopening_clears_resolved_at() {
        let mut message = message();
        message.apply_status(FailedMessageStatus::Ignored);
        message.apply_status(FailedMessageStatus::Pending);
        assert!(message.resolved_at.is_none());
    }
}
