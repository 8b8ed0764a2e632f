//! Order participant.

use chrono::Utc;
use common::{OrderId, SagaId};
use domain::{CancelOrder, CreateOrder, Order, OrderCancelled, OrderCreated, SagaEvent};
use store::{SagaStore, StoreTx};

use crate::error::Result;

/// Aggregate type of the rows this participant writes to the outbox.
pub const ORDER_AGGREGATE: &str = "Order";

/// Owns orders. Every handler commits its entity change and its reply in
/// one transaction.
#[derive(Clone)]
pub struct OrderService<S: SagaStore> {
    store: S,
}

impl<S: SagaStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates the order and replies OrderCreated.
    ///
    /// A redelivered command finds the order already there and replies
    /// again without touching it.
    #[tracing::instrument(skip(self, command), fields(saga_id = %command.saga_id, order_id = %command.order_id))]
    pub async fn create_order(&self, command: &CreateOrder) -> Result<SagaEvent> {
        let mut tx = self.store.begin().await?;

        let order = match tx.order(command.order_id).await? {
            Some(existing) => {
                tracing::warn!("order already exists, replying without changes");
                existing
            }
            None => {
                let order = Order::create(command);
                tx.save_order(&order).await?;
                order
            }
        };

        let event = SagaEvent::OrderCreated(OrderCreated {
            saga_id: order.saga_id,
            order_id: order.order_id,
            customer_id: order.customer_id.clone(),
            product_id: order.product_id.clone(),
            quantity: order.quantity,
            total_amount: order.total_amount,
            timestamp: Utc::now(),
        });
        tx.enqueue_event(ORDER_AGGREGATE, &event).await?;
        tx.commit().await?;

        tracing::info!(status = %order.status, "order created");
        metrics::counter!("orders_created_total").increment(1);
        Ok(event)
    }

    /// Cancels the order and replies OrderCancelled.
    ///
    /// The reply is sent even when the order is missing or can no longer be
    /// cancelled, so the compensation chain always reaches its end.
    #[tracing::instrument(skip(self, command), fields(saga_id = %command.saga_id, order_id = %command.order_id))]
    pub async fn cancel_order(&self, command: &CancelOrder) -> Result<SagaEvent> {
        let mut tx = self.store.begin().await?;

        match tx.order(command.order_id).await? {
            Some(mut order) if order.status.can_cancel() => {
                order.cancel(&command.reason)?;
                tx.save_order(&order).await?;
                tracing::info!(reason = %command.reason, "order cancelled");
            }
            Some(order) => {
                tracing::warn!(status = %order.status, "order cannot be cancelled, replying anyway");
            }
            None => {
                tracing::warn!("order not found, replying anyway");
            }
        }

        let event = SagaEvent::OrderCancelled(OrderCancelled {
            saga_id: command.saga_id,
            order_id: command.order_id,
            reason: command.reason.clone(),
            timestamp: Utc::now(),
        });
        tx.enqueue_event(ORDER_AGGREGATE, &event).await?;
        tx.commit().await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        Ok(event)
    }

    /// Confirms the order in its own transaction.
    pub async fn confirm_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut tx = self.store.begin().await?;
        let order = confirm_in(tx.as_mut(), order_id).await?;
        tx.commit().await?;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get_order(order_id).await?)
    }

    pub async fn find_by_saga(&self, saga_id: SagaId) -> Result<Option<Order>> {
        Ok(self.store.find_order_by_saga(saga_id).await?)
    }
}

/// Confirms the order inside a transaction owned by the caller.
///
/// Returns `None` when the order does not exist. An order that is already
/// confirmed is returned unchanged.
pub(crate) async fn confirm_in(tx: &mut dyn StoreTx, order_id: OrderId) -> Result<Option<Order>> {
    let Some(mut order) = tx.order(order_id).await? else {
        tracing::warn!(%order_id, "order to confirm not found");
        return Ok(None);
    };

    if order.status.can_confirm() {
        order.confirm()?;
        tx.save_order(&order).await?;
        tracing::info!(%order_id, "order confirmed");
    }
    Ok(Some(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CustomerId, Money, ProductId};
    use domain::{MessageType, OrderStatus};
    use store::InMemoryStore;

    fn create_command() -> CreateOrder {
        CreateOrder {
            saga_id: SagaId::new(),
            order_id: OrderId::new(),
            customer_id: CustomerId::new("c1"),
            product_id: ProductId::new("p1"),
            quantity: 2,
            total_amount: Money::new(10000),
        }
    }

    #[tokio::test]
    async fn test_create_order_saves_order_and_reply() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());
        let command = create_command();

        let event = service.create_order(&command).await.unwrap();
        assert_eq!(event.message_type(), MessageType::OrderCreated);

        let order = service.get_order(command.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.quantity, 2);

        let outbox = store.outbox_records().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].aggregate_type, ORDER_AGGREGATE);
        assert_eq!(outbox[0].aggregate_id, command.saga_id.to_string());
    }

    #[tokio::test]
    async fn test_redelivered_create_keeps_single_order() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());
        let command = create_command();

        service.create_order(&command).await.unwrap();
        service.create_order(&command).await.unwrap();

        let order = service.find_by_saga(command.saga_id).await.unwrap().unwrap();
        assert_eq!(order.order_id, command.order_id);
    }

    #[tokio::test]
    async fn test_cancel_order_records_reason() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());
        let command = create_command();
        service.create_order(&command).await.unwrap();

        service
            .cancel_order(&CancelOrder {
                saga_id: command.saga_id,
                order_id: command.order_id,
                reason: "Payment declined".to_string(),
            })
            .await
            .unwrap();

        let order = service.get_order(command.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.cancellation_reason.as_deref(), Some("Payment declined"));
    }

    #[tokio::test]
    async fn test_cancel_missing_order_still_replies() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());

        let event = service
            .cancel_order(&CancelOrder {
                saga_id: SagaId::new(),
                order_id: OrderId::new(),
                reason: "gone".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(event.message_type(), MessageType::OrderCancelled);
        assert_eq!(store.outbox_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_order() {
        let store = InMemoryStore::new();
        let service = OrderService::new(store.clone());
        let command = create_command();
        service.create_order(&command).await.unwrap();

        let order = service.confirm_order(command.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);

        assert!(service.confirm_order(OrderId::new()).await.unwrap().is_none());
    }
}
