//! Persists messages arriving on `<topic>.DLT`.

use async_trait::async_trait;
use common::DLT_SUFFIX;
use store::{DeadLetterStore, FailedMessage};

use crate::broker::Message;
use crate::consumer::{
    DLT_EXCEPTION_MESSAGE, DLT_ORIGINAL_OFFSET, DLT_ORIGINAL_PARTITION, DLT_ORIGINAL_TOPIC,
    HandlerError, MessageHandler,
};

/// Records every dead-lettered message as a PENDING [`FailedMessage`].
///
/// Dead-lettering never feeds back into a saga; follow-up is manual through
/// the failed-message status.
#[derive(Clone)]
pub struct DeadLetterHandler<S: DeadLetterStore> {
    store: S,
}

impl<S: DeadLetterStore> DeadLetterHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn to_failed_message(message: &Message) -> FailedMessage {
        let original_topic = message
            .header(DLT_ORIGINAL_TOPIC)
            .map(str::to_string)
            .unwrap_or_else(|| {
                message
                    .topic
                    .strip_suffix(DLT_SUFFIX)
                    .unwrap_or(&message.topic)
                    .to_string()
            });
        let partition = message
            .header(DLT_ORIGINAL_PARTITION)
            .and_then(|p| p.parse().ok())
            .unwrap_or(message.partition);
        let offset = message
            .header(DLT_ORIGINAL_OFFSET)
            .and_then(|o| o.parse().ok())
            .unwrap_or(message.offset);

        FailedMessage::new(
            original_topic,
            partition,
            offset,
            message.key.clone(),
            message.value.clone(),
            message.header(DLT_EXCEPTION_MESSAGE).map(str::to_string),
        )
    }
}

#[async_trait]
impl<S: DeadLetterStore> MessageHandler for DeadLetterHandler<S> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let failed = Self::to_failed_message(message);
        tracing::error!(
            original_topic = %failed.original_topic,
            partition = failed.partition_id,
            offset = failed.offset_id,
            key = ?failed.message_key,
            error = failed.error_message.as_deref().unwrap_or("Unknown error"),
            "dead-lettered message received"
        );

        self.store
            .save_failed_message(&failed)
            .await
            .map_err(HandlerError::retryable)?;

        tracing::info!(id = %failed.id, "failed message recorded");
        metrics::counter!("failed_messages_recorded_total").increment(1);
        Ok(())
    }
}
