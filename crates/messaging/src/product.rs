//! Product registration: published straight to the product topic and
//! consumed by the ingestion handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use domain::Product;

use crate::broker::{Broker, Message, ProducerRecord, RecordMetadata};
use crate::consumer::{HandlerError, MessageHandler};
use crate::error::ProductError;

/// Publishes product registrations keyed by product id, so every event of one
/// product stays on one partition.
#[derive(Clone)]
pub struct ProductPublisher<B: Broker> {
    broker: B,
    topic: String,
}

impl<B: Broker> ProductPublisher<B> {
    pub fn new(broker: B, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    #[tracing::instrument(skip(self, product), fields(product_id = %product.product_id))]
    pub async fn register(&self, product: &Product) -> Result<RecordMetadata, ProductError> {
        product.validate().map_err(ProductError::Invalid)?;
        let value = serde_json::to_string(product)?;
        let record = ProducerRecord::new(&self.topic, value).with_key(product.product_id.as_str());

        let metadata = self.broker.publish(record).await?;
        tracing::info!(
            partition = metadata.partition,
            offset = metadata.offset,
            "product registration published"
        );
        Ok(metadata)
    }
}

/// Consumes product registrations.
///
/// Blank or unparsable payloads can never succeed and go straight to the
/// dead-letter topic.
#[derive(Clone, Default)]
pub struct ProductIngestHandler {
    ingested: Arc<AtomicU64>,
}

impl ProductIngestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registrations processed so far.
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageHandler for ProductIngestHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        if message.value.trim().is_empty() {
            return Err(HandlerError::NonRetryable(format!(
                "payload is blank, key={}",
                message.key.as_deref().unwrap_or("")
            )));
        }

        let product: Product =
            serde_json::from_str(&message.value).map_err(HandlerError::non_retryable)?;
        product.validate().map_err(HandlerError::NonRetryable)?;

        self.ingested.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("products_ingested_total").increment(1);
        tracing::info!(
            product_id = %product.product_id,
            name = %product.name,
            category = %product.category,
            "product registration processed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use common::{PRODUCT_TOPIC, ProductId};

    fn product(id: &str) -> Product {
        Product {
            product_id: ProductId::new(id),
            name: "Widget".to_string(),
            price: 1500,
            category: "tools".to_string(),
        }
    }

    #[tokio::test]
    async fn registrations_of_one_product_share_a_partition() {
        let broker = InMemoryBroker::new(4);
        let publisher = ProductPublisher::new(broker.clone(), PRODUCT_TOPIC);

        let a = publisher.register(&product("SKU-1")).await.unwrap();
        let b = publisher.register(&product("SKU-1")).await.unwrap();
        assert_eq!(a.partition, b.partition);

        let messages = broker.messages(PRODUCT_TOPIC).await;
        assert_eq!(messages[0].key.as_deref(), Some("SKU-1"));
    }

    #[tokio::test]
    async fn invalid_product_is_not_published() {
        let broker = InMemoryBroker::new(1);
        let publisher = ProductPublisher::new(broker.clone(), PRODUCT_TOPIC);

        let mut invalid = product("SKU-1");
        invalid.name = String::new();
        assert!(matches!(
            publisher.register(&invalid).await,
            Err(ProductError::Invalid(_))
        ));
        assert!(broker.messages(PRODUCT_TOPIC).await.is_empty());
    }

    #[tokio::test]
    async fn ingest_accepts_valid_and_rejects_blank_or_malformed() {
        let broker = InMemoryBroker::new(1);
        ProductPublisher::new(broker.clone(), PRODUCT_TOPIC)
            .register(&product("SKU-1"))
            .await
            .unwrap();
        broker
            .publish(ProducerRecord::new(PRODUCT_TOPIC, "  ").with_key("SKU-2"))
            .await
            .unwrap();
        broker
            .publish(ProducerRecord::new(PRODUCT_TOPIC, "{oops").with_key("SKU-3"))
            .await
            .unwrap();

        let handler = ProductIngestHandler::new();
        let messages = broker.poll("g", PRODUCT_TOPIC, 10).await.unwrap();

        assert!(handler.handle(&messages[0]).await.is_ok());
        assert!(matches!(
            handler.handle(&messages[1]).await,
            Err(HandlerError::NonRetryable(_))
        ));
        assert!(matches!(
            handler.handle(&messages[2]).await,
            Err(HandlerError::NonRetryable(_))
        ));
        assert_eq!(handler.ingested(), 1);
    }
}
