//! Saga orchestrator for the order → payment → inventory saga.

use common::{CustomerId, Money, OrderId, PaymentId, ProductId, SagaId};
use domain::{
    CancelOrder, CancelPayment, CreateOrder, ProcessPayment, ReserveInventory, SagaCommand,
    SagaEvent, SagaState, SagaStatus, SagaStep,
};
use store::{SagaStore, StoreTx};

use crate::error::Result;
use crate::services::order::confirm_in;

/// Reason used for a compensating command when the saga recorded none.
const DEFAULT_COMPENSATION_REASON: &str = "Compensation";

/// What [`SagaOrchestrator::handle_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The saga moved; carries the status it ended in.
    Applied(SagaStatus),
    /// The saga is terminal or not waiting for this event.
    Ignored,
    /// No saga with the event's id exists.
    UnknownSaga,
}

/// Drives sagas from participant replies.
///
/// Every step runs in one local transaction: the saga row is read with a
/// lock, mutated, and saved together with the commands it emits, so a crash
/// never leaves a state change without its command or the other way round.
///
/// Forward sequence:
/// ```text
/// CreateOrder ──► OrderCreated ──► ProcessPayment ──► PaymentCompleted
///     ──► ReserveInventory ──► InventoryReserved ──► COMPLETED
/// ```
///
/// On PaymentFailed or InventoryFailed the saga enters COMPENSATING and
/// unwinds whatever the failed step left behind:
/// ```text
/// failed at RESERVE_INVENTORY: CancelPayment ──► PaymentCancelled ──► CancelOrder
/// failed at PROCESS_PAYMENT:   CancelOrder
///                              ──► OrderCancelled ──► COMPENSATED
/// ```
#[derive(Clone)]
pub struct SagaOrchestrator<S: SagaStore> {
    store: S,
}

impl<S: SagaStore> SagaOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates a saga in ORDER_PENDING and enqueues its CreateOrder command.
    #[tracing::instrument(skip(self))]
    pub async fn start_saga(
        &self,
        customer_id: CustomerId,
        product_id: ProductId,
        quantity: u32,
        total_amount: Money,
    ) -> Result<SagaState> {
        let saga = SagaState::start(customer_id, product_id, quantity, total_amount);
        let command = SagaCommand::CreateOrder(CreateOrder {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            customer_id: saga.customer_id.clone(),
            product_id: saga.product_id.clone(),
            quantity: saga.quantity,
            total_amount: saga.total_amount,
        });

        let mut tx = self.store.begin().await?;
        tx.save_saga(&saga).await?;
        tx.enqueue_command(&command).await?;
        tx.commit().await?;

        tracing::info!(
            saga_id = %saga.saga_id,
            order_id = %saga.order_id,
            "saga started"
        );
        metrics::counter!("saga_started_total").increment(1);
        Ok(saga)
    }

    /// Applies one participant reply to its saga.
    ///
    /// An event for an unknown saga, for a terminal saga, or one the saga is
    /// not waiting for is logged and ignored without any write.
    #[tracing::instrument(skip(self, event), fields(saga_id = %event.saga_id(), event_type = %event.message_type()))]
    pub async fn handle_event(&self, event: &SagaEvent) -> Result<EventOutcome> {
        let mut tx = self.store.begin().await?;

        let Some(mut saga) = tx.saga(event.saga_id()).await? else {
            tracing::warn!("saga not found, event ignored");
            tx.rollback().await?;
            metrics::counter!("saga_events_ignored_total", "reason" => "unknown_saga")
                .increment(1);
            return Ok(EventOutcome::UnknownSaga);
        };

        if !accepts(saga.status, event) {
            if saga.is_terminal() {
                tracing::debug!(status = %saga.status, "saga already finished, event ignored");
            } else {
                tracing::warn!(status = %saga.status, "event out of sequence, ignored");
            }
            tx.rollback().await?;
            metrics::counter!("saga_events_ignored_total", "reason" => "out_of_sequence")
                .increment(1);
            return Ok(EventOutcome::Ignored);
        }

        let previous = saga.status;
        apply(tx.as_mut(), &mut saga, event).await?;
        tx.save_saga(&saga).await?;
        tx.commit().await?;

        tracing::info!(
            from = %previous,
            status = %saga.status,
            step = %saga.current_step,
            "saga advanced"
        );
        record_outcome(previous, &saga);
        Ok(EventOutcome::Applied(saga.status))
    }

    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        Ok(self.store.get_saga(saga_id).await?)
    }

    pub async fn find_by_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        Ok(self.store.find_saga_by_order(order_id).await?)
    }

    /// Newest first, optionally only those in `status`.
    pub async fn list_sagas(&self, status: Option<SagaStatus>) -> Result<Vec<SagaState>> {
        Ok(self.store.list_sagas(status).await?)
    }
}

/// Whether a saga in `status` is waiting for `event`.
fn accepts(status: SagaStatus, event: &SagaEvent) -> bool {
    match event {
        SagaEvent::OrderCreated(_) => status == SagaStatus::OrderPending,
        SagaEvent::PaymentCompleted(_) => status == SagaStatus::PaymentPending,
        SagaEvent::InventoryReserved(_) => status == SagaStatus::InventoryPending,
        SagaEvent::PaymentFailed(_) | SagaEvent::InventoryFailed(_) => status.can_compensate(),
        SagaEvent::PaymentCancelled(_)
        | SagaEvent::InventoryReleased(_)
        | SagaEvent::OrderCancelled(_) => status == SagaStatus::Compensating,
    }
}

async fn apply(tx: &mut dyn StoreTx, saga: &mut SagaState, event: &SagaEvent) -> Result<()> {
    match event {
        SagaEvent::OrderCreated(_) => {
            saga.set_status(SagaStatus::OrderCreated)?;
            saga.advance_to_next_step();
            let command = SagaCommand::ProcessPayment(ProcessPayment {
                saga_id: saga.saga_id,
                order_id: saga.order_id,
                customer_id: saga.customer_id.clone(),
                amount: saga.total_amount,
            });
            tx.enqueue_command(&command).await?;
            saga.set_status(SagaStatus::PaymentPending)?;
        }
        SagaEvent::PaymentCompleted(completed) => {
            saga.set_status(SagaStatus::PaymentCompleted)?;
            saga.record_payment(completed.payment_id.clone());
            saga.advance_to_next_step();
            let command = SagaCommand::ReserveInventory(ReserveInventory {
                saga_id: saga.saga_id,
                order_id: saga.order_id,
                product_id: saga.product_id.clone(),
                quantity: saga.quantity,
            });
            tx.enqueue_command(&command).await?;
            saga.set_status(SagaStatus::InventoryPending)?;
        }
        SagaEvent::InventoryReserved(_) => {
            saga.mark_completed()?;
            confirm_in(tx, saga.order_id).await?;
        }
        SagaEvent::PaymentFailed(failed) => {
            compensate(tx, saga, &failed.reason).await?;
        }
        SagaEvent::InventoryFailed(failed) => {
            compensate(tx, saga, &failed.reason).await?;
        }
        SagaEvent::PaymentCancelled(cancelled) => {
            emit_cancel_order(tx, saga, cancelled.reason.clone()).await?;
        }
        SagaEvent::InventoryReleased(_) => {
            let reason = saga
                .failure_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_COMPENSATION_REASON.to_string());
            match saga.payment_id.clone() {
                Some(payment_id) => emit_cancel_payment(tx, saga, payment_id, reason).await?,
                None => emit_cancel_order(tx, saga, reason).await?,
            }
        }
        SagaEvent::OrderCancelled(_) => {
            saga.mark_compensated()?;
        }
    }
    Ok(())
}

/// Enters COMPENSATING and emits the first compensating command for the
/// step that failed. A failure while creating the order leaves nothing to
/// undo and ends the saga FAILED.
async fn compensate(tx: &mut dyn StoreTx, saga: &mut SagaState, reason: &str) -> Result<()> {
    saga.start_compensation(reason)?;
    tracing::warn!(
        saga_id = %saga.saga_id,
        step = %saga.current_step,
        %reason,
        "saga compensation started"
    );

    match saga.current_step {
        SagaStep::ReserveInventory | SagaStep::CompleteSaga => match saga.payment_id.clone() {
            Some(payment_id) => emit_cancel_payment(tx, saga, payment_id, reason.to_string()).await,
            None => emit_cancel_order(tx, saga, reason.to_string()).await,
        },
        SagaStep::ProcessPayment => emit_cancel_order(tx, saga, reason.to_string()).await,
        _ => {
            saga.mark_failed(reason)?;
            Ok(())
        }
    }
}

async fn emit_cancel_payment(
    tx: &mut dyn StoreTx,
    saga: &mut SagaState,
    payment_id: PaymentId,
    reason: String,
) -> Result<()> {
    saga.set_step(SagaStep::CancelPayment);
    let command = SagaCommand::CancelPayment(CancelPayment {
        saga_id: saga.saga_id,
        order_id: saga.order_id,
        payment_id,
        reason,
    });
    tx.enqueue_command(&command).await?;
    Ok(())
}

async fn emit_cancel_order(tx: &mut dyn StoreTx, saga: &mut SagaState, reason: String) -> Result<()> {
    saga.set_step(SagaStep::CancelOrder);
    let command = SagaCommand::CancelOrder(CancelOrder {
        saga_id: saga.saga_id,
        order_id: saga.order_id,
        reason,
    });
    tx.enqueue_command(&command).await?;
    Ok(())
}

fn record_outcome(previous: SagaStatus, saga: &SagaState) {
    if previous == saga.status {
        return;
    }
    match saga.status {
        SagaStatus::Completed => metrics::counter!("saga_completed_total").increment(1),
        SagaStatus::Compensated => metrics::counter!("saga_compensated_total").increment(1),
        SagaStatus::Failed => metrics::counter!("saga_failed_total").increment(1),
        SagaStatus::Compensating => {
            metrics::counter!("saga_compensations_started_total").increment(1)
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{
        InventoryFailed, InventoryReleased, InventoryReserved, MessageType, OrderCancelled,
        OrderCreated, PaymentCancelled, PaymentCompleted, PaymentFailed,
    };
    use store::{InMemoryStore, OutboxRecord, SAGA_AGGREGATE};

    async fn started() -> (InMemoryStore, SagaOrchestrator<InMemoryStore>, SagaState) {
        let store = InMemoryStore::new();
        let orchestrator = SagaOrchestrator::new(store.clone());
        let saga = orchestrator
            .start_saga(
                CustomerId::new("c1"),
                ProductId::new("p1"),
                2,
                Money::new(10000),
            )
            .await
            .unwrap();
        (store, orchestrator, saga)
    }

    fn order_created(saga: &SagaState) -> SagaEvent {
        SagaEvent::OrderCreated(OrderCreated {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            customer_id: saga.customer_id.clone(),
            product_id: saga.product_id.clone(),
            quantity: saga.quantity,
            total_amount: saga.total_amount,
            timestamp: Utc::now(),
        })
    }

    fn payment_completed(saga: &SagaState, payment_id: &str) -> SagaEvent {
        SagaEvent::PaymentCompleted(PaymentCompleted {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            payment_id: PaymentId::new(payment_id),
            amount: saga.total_amount,
            timestamp: Utc::now(),
        })
    }

    fn payment_failed(saga: &SagaState, reason: &str) -> SagaEvent {
        SagaEvent::PaymentFailed(PaymentFailed {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
    }

    fn inventory_failed(saga: &SagaState, reason: &str) -> SagaEvent {
        SagaEvent::InventoryFailed(InventoryFailed {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            product_id: saga.product_id.clone(),
            requested_quantity: saga.quantity,
            available_quantity: 0,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
    }

    fn order_cancelled(saga: &SagaState) -> SagaEvent {
        SagaEvent::OrderCancelled(OrderCancelled {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            reason: "x".to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn commands(store: &InMemoryStore) -> Vec<OutboxRecord> {
        store
            .outbox_records()
            .await
            .into_iter()
            .filter(|r| r.aggregate_type == SAGA_AGGREGATE)
            .collect()
    }

    async fn state(orchestrator: &SagaOrchestrator<InMemoryStore>, saga_id: SagaId) -> SagaState {
        orchestrator.get_saga(saga_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn start_persists_saga_and_create_order() {
        let (store, orchestrator, saga) = started().await;

        let stored = state(&orchestrator, saga.saga_id).await;
        assert_eq!(stored.status, SagaStatus::OrderPending);
        assert_eq!(stored.current_step, SagaStep::CreateOrder);

        let commands = commands(&store).await;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].event_type, MessageType::CreateOrder);
        assert_eq!(commands[0].aggregate_id, saga.saga_id.to_string());
    }

    #[tokio::test]
    async fn forward_path_emits_payment_then_inventory() {
        let (store, orchestrator, saga) = started().await;

        let outcome = orchestrator.handle_event(&order_created(&saga)).await.unwrap();
        assert_eq!(outcome, EventOutcome::Applied(SagaStatus::PaymentPending));
        let stored = state(&orchestrator, saga.saga_id).await;
        assert_eq!(stored.current_step, SagaStep::ProcessPayment);

        orchestrator
            .handle_event(&payment_completed(&saga, "pay-1"))
            .await
            .unwrap();
        let stored = state(&orchestrator, saga.saga_id).await;
        assert_eq!(stored.status, SagaStatus::InventoryPending);
        assert_eq!(stored.current_step, SagaStep::ReserveInventory);
        assert_eq!(stored.payment_id, Some(PaymentId::new("pay-1")));

        let types: Vec<_> = commands(&store).await.iter().map(|r| r.event_type).collect();
        assert_eq!(
            types,
            vec![
                MessageType::CreateOrder,
                MessageType::ProcessPayment,
                MessageType::ReserveInventory
            ]
        );
    }

    #[tokio::test]
    async fn inventory_reserved_completes_saga() {
        let (_store, orchestrator, saga) = started().await;
        orchestrator.handle_event(&order_created(&saga)).await.unwrap();
        orchestrator
            .handle_event(&payment_completed(&saga, "pay-1"))
            .await
            .unwrap();

        let outcome = orchestrator
            .handle_event(&SagaEvent::InventoryReserved(InventoryReserved {
                saga_id: saga.saga_id,
                order_id: saga.order_id,
                product_id: saga.product_id.clone(),
                quantity: saga.quantity,
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        assert_eq!(outcome, EventOutcome::Applied(SagaStatus::Completed));
        let stored = state(&orchestrator, saga.saga_id).await;
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.current_step, SagaStep::CompleteSaga);
    }

    #[tokio::test]
    async fn payment_failure_cancels_order_only() {
        let (store, orchestrator, saga) = started().await;
        orchestrator.handle_event(&order_created(&saga)).await.unwrap();

        orchestrator
            .handle_event(&payment_failed(&saga, "Card declined"))
            .await
            .unwrap();

        let stored = state(&orchestrator, saga.saga_id).await;
        assert_eq!(stored.status, SagaStatus::Compensating);
        assert_eq!(stored.current_step, SagaStep::CancelOrder);
        assert_eq!(stored.failure_reason.as_deref(), Some("Card declined"));

        let last = commands(&store).await.pop().unwrap();
        assert_eq!(last.event_type, MessageType::CancelOrder);
        assert_eq!(last.payload["reason"], "Card declined");

        let outcome = orchestrator.handle_event(&order_cancelled(&saga)).await.unwrap();
        assert_eq!(outcome, EventOutcome::Applied(SagaStatus::Compensated));
    }

    #[tokio::test]
    async fn inventory_failure_cancels_payment_first() {
        let (store, orchestrator, saga) = started().await;
        orchestrator.handle_event(&order_created(&saga)).await.unwrap();
        orchestrator
            .handle_event(&payment_completed(&saga, "pay-1"))
            .await
            .unwrap();

        orchestrator
            .handle_event(&inventory_failed(&saga, "재고 부족"))
            .await
            .unwrap();

        let stored = state(&orchestrator, saga.saga_id).await;
        assert_eq!(stored.status, SagaStatus::Compensating);
        assert_eq!(stored.current_step, SagaStep::CancelPayment);

        let cancels: Vec<_> = commands(&store)
            .await
            .into_iter()
            .filter(|r| {
                matches!(
                    r.event_type,
                    MessageType::CancelPayment | MessageType::CancelOrder
                )
            })
            .collect();
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].event_type, MessageType::CancelPayment);
        assert_eq!(cancels[0].payload["paymentId"], "pay-1");

        orchestrator
            .handle_event(&SagaEvent::PaymentCancelled(PaymentCancelled {
                saga_id: saga.saga_id,
                order_id: saga.order_id,
                payment_id: PaymentId::new("pay-1"),
                reason: "재고 부족".to_string(),
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        let last = commands(&store).await.pop().unwrap();
        assert_eq!(last.event_type, MessageType::CancelOrder);
        let stored = state(&orchestrator, saga.saga_id).await;
        assert_eq!(stored.current_step, SagaStep::CancelOrder);
    }

    #[tokio::test]
    async fn inventory_released_cancels_payment_when_charged() {
        let (store, orchestrator, saga) = started().await;
        orchestrator.handle_event(&order_created(&saga)).await.unwrap();
        orchestrator
            .handle_event(&payment_completed(&saga, "pay-1"))
            .await
            .unwrap();
        orchestrator
            .handle_event(&inventory_failed(&saga, "Insufficient stock"))
            .await
            .unwrap();

        orchestrator
            .handle_event(&SagaEvent::InventoryReleased(InventoryReleased {
                saga_id: saga.saga_id,
                order_id: saga.order_id,
                product_id: saga.product_id.clone(),
                quantity: saga.quantity,
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        let last = commands(&store).await.pop().unwrap();
        assert_eq!(last.event_type, MessageType::CancelPayment);
        assert_eq!(last.payload["reason"], "Insufficient stock");
    }

    #[tokio::test]
    async fn unknown_saga_is_ignored() {
        let (store, orchestrator, saga) = started().await;
        let stranger = SagaState::start(
            CustomerId::new("c2"),
            ProductId::new("p2"),
            1,
            Money::new(1),
        );

        let outcome = orchestrator
            .handle_event(&order_created(&stranger))
            .await
            .unwrap();

        assert_eq!(outcome, EventOutcome::UnknownSaga);
        assert_eq!(store.outbox_records().await.len(), 1);
        assert_eq!(
            state(&orchestrator, saga.saga_id).await.status,
            SagaStatus::OrderPending
        );
    }

    #[tokio::test]
    async fn out_of_sequence_events_do_not_mutate() {
        let (store, orchestrator, saga) = started().await;

        let outcome = orchestrator
            .handle_event(&payment_completed(&saga, "pay-1"))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);

        let outcome = orchestrator.handle_event(&order_cancelled(&saga)).await.unwrap();
        assert_eq!(outcome, EventOutcome::Ignored);

        assert_eq!(state(&orchestrator, saga.saga_id).await, saga);
        assert_eq!(store.outbox_records().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_forward_event_is_ignored() {
        let (store, orchestrator, saga) = started().await;
        orchestrator.handle_event(&order_created(&saga)).await.unwrap();

        let outcome = orchestrator.handle_event(&order_created(&saga)).await.unwrap();

        assert_eq!(outcome, EventOutcome::Ignored);
        assert_eq!(commands(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn terminal_saga_accepts_nothing() {
        let (store, orchestrator, saga) = started().await;
        orchestrator.handle_event(&order_created(&saga)).await.unwrap();
        orchestrator
            .handle_event(&payment_failed(&saga, "declined"))
            .await
            .unwrap();
        orchestrator.handle_event(&order_cancelled(&saga)).await.unwrap();
        let before = commands(&store).await.len();

        let outcome = orchestrator
            .handle_event(&payment_failed(&saga, "again"))
            .await
            .unwrap();

        assert_eq!(outcome, EventOutcome::Ignored);
        assert_eq!(commands(&store).await.len(), before);
        let stored = state(&orchestrator, saga.saga_id).await;
        assert_eq!(stored.status, SagaStatus::Compensated);
        assert_eq!(stored.failure_reason.as_deref(), Some("declined"));
    }

    #[tokio::test]
    async fn failure_before_order_created_fails_saga() {
        let (store, orchestrator, saga) = started().await;

        let outcome = orchestrator
            .handle_event(&payment_failed(&saga, "early"))
            .await
            .unwrap();

        assert_eq!(outcome, EventOutcome::Applied(SagaStatus::Failed));
        assert_eq!(commands(&store).await.len(), 1);
        let stored = state(&orchestrator, saga.saga_id).await;
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (_store, orchestrator, saga) = started().await;
        orchestrator
            .start_saga(CustomerId::new("c2"), ProductId::new("p1"), 1, Money::new(5))
            .await
            .unwrap();
        orchestrator.handle_event(&order_created(&saga)).await.unwrap();

        assert_eq!(orchestrator.list_sagas(None).await.unwrap().len(), 2);
        let pending = orchestrator
            .list_sagas(Some(SagaStatus::PaymentPending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].saga_id, saga.saga_id);

        let by_order = orchestrator.find_by_order(saga.order_id).await.unwrap().unwrap();
        assert_eq!(by_order.saga_id, saga.saga_id);
    }
}
