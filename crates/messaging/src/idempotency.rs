//! Consumer-side deduplication keyed by consumer group and message position.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::broker::Message;

/// Identity of a delivered message as seen by one consumer group:
/// `group:topic-partition-offset`.
///
/// Detects broker redelivery of the same record to the same group. Each
/// group keeps its own record, so two groups reading one topic both handle
/// every message. A second publish of an identical payload gets a new
/// offset and is not treated as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub group: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl MessageKey {
    pub fn new(
        group: impl Into<String>,
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
    ) -> Self {
        Self {
            group: group.into(),
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// Key of `message` delivered to `group`.
    pub fn for_message(group: impl Into<String>, message: &Message) -> Self {
        Self::new(group, message.topic.clone(), message.partition, message.offset)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}-{}",
            self.group, self.topic, self.partition, self.offset
        )
    }
}

#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    async fn is_processed(&self, key: &MessageKey) -> bool;

    async fn mark_processed(&self, key: &MessageKey);
}

/// Process-wide key set without expiry.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyGuard {
    processed: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.processed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processed.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryIdempotencyGuard {
    async fn is_processed(&self, key: &MessageKey) -> bool {
        self.processed.read().await.contains(&key.to_string())
    }

    async fn mark_processed(&self, key: &MessageKey) {
        self.processed.write().await.insert(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_is_group_then_position() {
        let key = MessageKey::new("saga-orchestrator", "saga-event-topic", 2, 17);
        assert_eq!(key.to_string(), "saga-orchestrator:saga-event-topic-2-17");
    }

    #[tokio::test]
    async fn marked_key_is_processed() {
        let guard = InMemoryIdempotencyGuard::new();
        let key = MessageKey::new("g", "t", 0, 1);

        assert!(!guard.is_processed(&key).await);
        guard.mark_processed(&key).await;
        assert!(guard.is_processed(&key).await);

        guard.mark_processed(&key).await;
        assert_eq!(guard.len().await, 1);
    }

    #[tokio::test]
    async fn other_offsets_are_not_processed() {
        let guard = InMemoryIdempotencyGuard::new();
        guard.mark_processed(&MessageKey::new("g", "t", 0, 1)).await;

        assert!(!guard.is_processed(&MessageKey::new("g", "t", 0, 2)).await);
        assert!(!guard.is_processed(&MessageKey::new("g", "t", 1, 1)).await);
        assert!(!guard.is_processed(&MessageKey::new("g", "u", 0, 1)).await);
    }

    #[tokio::test]
    async fn same_position_is_tracked_per_group() {
        let guard = InMemoryIdempotencyGuard::new();
        guard
            .mark_processed(&MessageKey::new("saga-participants", "t", 0, 1))
            .await;

        assert!(!guard.is_processed(&MessageKey::new("product-ingest", "t", 0, 1)).await);
        assert!(guard.is_processed(&MessageKey::new("saga-participants", "t", 0, 1)).await);
    }
}
