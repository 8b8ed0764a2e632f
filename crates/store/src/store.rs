use async_trait::async_trait;
use common::{OrderId, PaymentId, ProductId, SagaId};
use domain::{Inventory, Order, Payment, SagaCommand, SagaEvent, SagaState, SagaStatus};
use uuid::Uuid;

use crate::{FailedMessage, FailedMessageStatus, OutboxRecord, OutboxStatus, Result};

/// One atomic unit of work over saga, participant and outbox rows.
///
/// Nothing written through a transaction is visible to other readers until
/// [`StoreTx::commit`] returns. Dropping a transaction without committing
/// discards every write made through it.
///
/// Reads through a transaction lock the row they return until the
/// transaction ends, so two handlers never interleave on one saga or one
/// inventory row.
#[async_trait]
pub trait StoreTx: Send {
    async fn saga(&mut self, saga_id: SagaId) -> Result<Option<SagaState>>;

    async fn save_saga(&mut self, saga: &SagaState) -> Result<()>;

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    async fn save_order(&mut self, order: &Order) -> Result<()>;

    async fn payment(&mut self, payment_id: &PaymentId) -> Result<Option<Payment>>;

    async fn save_payment(&mut self, payment: &Payment) -> Result<()>;

    async fn inventory(&mut self, product_id: &ProductId) -> Result<Option<Inventory>>;

    async fn save_inventory(&mut self, inventory: &Inventory) -> Result<()>;

    /// Inserts a PENDING outbox row.
    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<()>;

    /// Makes every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Enqueues a command for the saga command topic.
    async fn enqueue_command(&mut self, command: &SagaCommand) -> Result<OutboxRecord> {
        let record = OutboxRecord::for_command(command)?;
        self.insert_outbox(&record).await?;
        Ok(record)
    }

    /// Enqueues a participant reply for the saga event topic.
    async fn enqueue_event(
        &mut self,
        aggregate_type: &'static str,
        event: &SagaEvent,
    ) -> Result<OutboxRecord> {
        let record = OutboxRecord::for_event(aggregate_type, event)?;
        self.insert_outbox(&record).await?;
        Ok(record)
    }
}

/// Transactional access plus the read-only lookups of the operational surface.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Starts a new transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>>;

    async fn find_saga_by_order(&self, order_id: OrderId) -> Result<Option<SagaState>>;

    /// Lists sagas, newest first, optionally filtered by status.
    async fn list_sagas(&self, status: Option<SagaStatus>) -> Result<Vec<SagaState>>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn find_order_by_saga(&self, saga_id: SagaId) -> Result<Option<Order>>;

    async fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>>;

    async fn find_payment_by_saga(&self, saga_id: SagaId) -> Result<Option<Payment>>;

    async fn get_inventory(&self, product_id: &ProductId) -> Result<Option<Inventory>>;
}

/// Relay-side access to the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns up to `limit` PENDING rows, oldest first.
    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Returns up to `limit` rows with the given status, oldest first.
    async fn find_by_status(&self, status: OutboxStatus, limit: usize)
    -> Result<Vec<OutboxRecord>>;

    async fn get_outbox(&self, id: Uuid) -> Result<Option<OutboxRecord>>;

    /// PENDING → SENT, stamping `processed_at`.
    async fn mark_sent(&self, id: Uuid) -> Result<()>;

    /// PENDING → FAILED, incrementing `retry_count`.
    async fn mark_failed(&self, id: Uuid) -> Result<()>;

    /// FAILED → PENDING. Returns false when the row is not FAILED.
    async fn requeue(&self, id: Uuid) -> Result<bool>;

    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64>;
}

/// Persistence for dead-lettered messages.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn save_failed_message(&self, message: &FailedMessage) -> Result<()>;

    async fn get_failed_message(&self, id: Uuid) -> Result<Option<FailedMessage>>;

    /// Lists dead-lettered messages, oldest first, with optional filters.
    async fn find_failed_messages(
        &self,
        status: Option<FailedMessageStatus>,
        original_topic: Option<&str>,
    ) -> Result<Vec<FailedMessage>>;

    /// Applies an operator status change. Returns `None` if the id is unknown.
    async fn update_failed_message_status(
        &self,
        id: Uuid,
        status: FailedMessageStatus,
    ) -> Result<Option<FailedMessage>>;
}

/// Everything the services need from one storage backend.
pub trait Store: SagaStore + OutboxStore + DeadLetterStore + Clone + 'static {}

impl<T> Store for T where T: SagaStore + OutboxStore + DeadLetterStore + Clone + 'static {}
