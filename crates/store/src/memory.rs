use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{OrderId, PaymentId, ProductId, SagaId};
use domain::{Inventory, Order, Payment, SagaState, SagaStatus};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::{
    FailedMessage, FailedMessageStatus, OutboxRecord, OutboxStatus, Result, StoreError,
    store::{DeadLetterStore, OutboxStore, SagaStore, StoreTx},
};

#[derive(Debug, Default)]
struct Tables {
    sagas: HashMap<SagaId, SagaState>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    inventory: HashMap<ProductId, Inventory>,
    /// Insertion order is commit order.
    outbox: Vec<OutboxRecord>,
    failed_messages: Vec<FailedMessage>,
}

impl Tables {
    fn outbox_mut(&mut self, id: Uuid) -> Result<&mut OutboxRecord> {
        self.outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Outbox record",
                id: id.to_string(),
            })
    }
}

/// Row touched by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Saga(SagaId),
    Order(OrderId),
    Payment(PaymentId),
    Inventory(ProductId),
}

type RowLocks = Arc<Mutex<HashMap<RowKey, Arc<AsyncMutex<()>>>>>;

/// In-memory store implementation for tests and single-process runs.
///
/// A transaction locks every saga, order, payment or inventory row it reads
/// or writes until commit or rollback, like `SELECT ... FOR UPDATE`, and
/// stages its writes so they become visible all at once. Transactions on
/// different rows run concurrently. The tables themselves are only locked
/// for the duration of a single read or of the commit.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    rows: RowLocks,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every outbox row in commit order.
    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.tables.read().await.outbox.clone()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

#[derive(Default)]
struct Staged {
    sagas: HashMap<SagaId, SagaState>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    inventory: HashMap<ProductId, Inventory>,
    outbox: Vec<OutboxRecord>,
}

/// Transaction over [`InMemoryStore`].
pub struct InMemoryTx {
    tables: Arc<RwLock<Tables>>,
    rows: RowLocks,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl InMemoryTx {
    /// Waits until no other transaction holds `key`, then holds it until
    /// this transaction ends.
    async fn lock(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let row = {
            let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
            rows.entry(key.clone()).or_default().clone()
        };
        let guard = row.lock_owned().await;
        self.held.insert(key, guard);
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn saga(&mut self, saga_id: SagaId) -> Result<Option<SagaState>> {
        self.lock(RowKey::Saga(saga_id)).await;
        if let Some(saga) = self.staged.sagas.get(&saga_id) {
            return Ok(Some(saga.clone()));
        }
        Ok(self.tables.read().await.sagas.get(&saga_id).cloned())
    }

    async fn save_saga(&mut self, saga: &SagaState) -> Result<()> {
        self.lock(RowKey::Saga(saga.saga_id)).await;
        self.staged.sagas.insert(saga.saga_id, saga.clone());
        Ok(())
    }

    async fn order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        self.lock(RowKey::Order(order_id)).await;
        if let Some(order) = self.staged.orders.get(&order_id) {
            return Ok(Some(order.clone()));
        }
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        self.lock(RowKey::Order(order.order_id)).await;
        self.staged.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn payment(&mut self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        self.lock(RowKey::Payment(payment_id.clone())).await;
        if let Some(payment) = self.staged.payments.get(payment_id) {
            return Ok(Some(payment.clone()));
        }
        Ok(self.tables.read().await.payments.get(payment_id).cloned())
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<()> {
        self.lock(RowKey::Payment(payment.payment_id.clone())).await;
        self.staged
            .payments
            .insert(payment.payment_id.clone(), payment.clone());
        Ok(())
    }

    async fn inventory(&mut self, product_id: &ProductId) -> Result<Option<Inventory>> {
        self.lock(RowKey::Inventory(product_id.clone())).await;
        if let Some(inventory) = self.staged.inventory.get(product_id) {
            return Ok(Some(inventory.clone()));
        }
        Ok(self.tables.read().await.inventory.get(product_id).cloned())
    }

    async fn save_inventory(&mut self, inventory: &Inventory) -> Result<()> {
        self.lock(RowKey::Inventory(inventory.product_id.clone())).await;
        self.staged
            .inventory
            .insert(inventory.product_id.clone(), inventory.clone());
        Ok(())
    }

    async fn insert_outbox(&mut self, record: &OutboxRecord) -> Result<()> {
        self.staged.outbox.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTx {
            tables,
            held,
            staged,
            ..
        } = *self;
        {
            let mut tables = tables.write().await;
            tables.sagas.extend(staged.sagas);
            tables.orders.extend(staged.orders);
            tables.payments.extend(staged.payments);
            tables.inventory.extend(staged.inventory);
            tables.outbox.extend(staged.outbox);
        }
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SagaStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(InMemoryTx {
            tables: self.tables.clone(),
            rows: self.rows.clone(),
            held: HashMap::new(),
            staged: Staged::default(),
        }))
    }

    async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        Ok(self.tables.read().await.sagas.get(&saga_id).cloned())
    }

    async fn find_saga_by_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        Ok(self
            .tables
            .read()
            .await
            .sagas
            .values()
            .find(|s| s.order_id == order_id)
            .cloned())
    }

    async fn list_sagas(&self, status: Option<SagaStatus>) -> Result<Vec<SagaState>> {
        let tables = self.tables.read().await;
        let mut sagas: Vec<_> = tables
            .sagas
            .values()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        sagas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sagas)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn find_order_by_saga(&self, saga_id: SagaId) -> Result<Option<Order>> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .find(|o| o.saga_id == saga_id)
            .cloned())
    }

    async fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self.tables.read().await.payments.get(payment_id).cloned())
    }

    async fn find_payment_by_saga(&self, saga_id: SagaId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.saga_id == saga_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn get_inventory(&self, product_id: &ProductId) -> Result<Option<Inventory>> {
        Ok(self.tables.read().await.inventory.get(product_id).cloned())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn find_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        self.find_by_status(OutboxStatus::Pending, limit).await
    }

    async fn find_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .outbox
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        // Stable sort keeps commit order for equal timestamps.
        records.sort_by_key(|r| r.created_at);
        records.truncate(limit);
        Ok(records)
    }

    async fn get_outbox(&self, id: Uuid) -> Result<Option<OutboxRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .outbox
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        self.tables.write().await.outbox_mut(id)?.mark_sent();
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        self.tables.write().await.outbox_mut(id)?.mark_failed();
        Ok(())
    }

    async fn requeue(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let record = tables.outbox_mut(id)?;
        if record.status != OutboxStatus::Failed {
            return Ok(false);
        }
        record.status = OutboxStatus::Pending;
        Ok(true)
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.outbox.iter().filter(|r| r.status == status).count() as u64)
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryStore {
    async fn save_failed_message(&self, message: &FailedMessage) -> Result<()> {
        self.tables
            .write()
            .await
            .failed_messages
            .push(message.clone());
        Ok(())
    }

    async fn get_failed_message(&self, id: Uuid) -> Result<Option<FailedMessage>> {
        Ok(self
            .tables
            .read()
            .await
            .failed_messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn find_failed_messages(
        &self,
        status: Option<FailedMessageStatus>,
        original_topic: Option<&str>,
    ) -> Result<Vec<FailedMessage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .failed_messages
            .iter()
            .filter(|m| status.is_none_or(|s| m.status == s))
            .filter(|m| original_topic.is_none_or(|t| m.original_topic == t))
            .cloned()
            .collect())
    }

    async fn update_failed_message_status(
        &self,
        id: Uuid,
        status: FailedMessageStatus,
    ) -> Result<Option<FailedMessage>> {
        let mut tables = self.tables.write().await;
        let Some(message) = tables.failed_messages.iter_mut().find(|m| m.id == id) else {
            return Ok(None);
        };
        message.apply_status(status);
        Ok(Some(message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use common::{CustomerId, Money};
    use domain::{CreateOrder, MessageType, SagaCommand};

    use super::*;

    fn saga() -> SagaState {
        SagaState::start(
            CustomerId::new("c1"),
            ProductId::new("p1"),
            2,
            Money::new(10000),
        )
    }

    fn create_order(saga: &SagaState) -> SagaCommand {
        SagaCommand::CreateOrder(CreateOrder {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            customer_id: saga.customer_id.clone(),
            product_id: saga.product_id.clone(),
            quantity: saga.quantity,
            total_amount: saga.total_amount,
        })
    }

    #[tokio::test]
    async fn committed_transaction_exposes_state_and_one_pending_row() {
        let store = InMemoryStore::new();
        let saga = saga();

        let mut tx = store.begin().await.unwrap();
        tx.save_saga(&saga).await.unwrap();
        tx.enqueue_command(&create_order(&saga)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_saga(saga.saga_id).await.unwrap(), Some(saga));
        let pending = store.find_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_type, MessageType::CreateOrder);
        assert_eq!(pending[0].status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn rolled_back_transaction_leaves_nothing_behind() {
        let store = InMemoryStore::new();
        let saga = saga();

        let mut tx = store.begin().await.unwrap();
        tx.save_saga(&saga).await.unwrap();
        tx.enqueue_command(&create_order(&saga)).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.get_saga(saga.saga_id).await.unwrap().is_none());
        assert_eq!(store.count_by_status(OutboxStatus::Pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_transaction_is_rolled_back() {
        let store = InMemoryStore::new();
        let saga = saga();
        {
            let mut tx = store.begin().await.unwrap();
            tx.save_saga(&saga).await.unwrap();
        }
        assert!(store.get_saga(saga.saga_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transaction_reads_its_own_writes() {
        let store = InMemoryStore::new();
        let mut inventory = Inventory::new(ProductId::new("p1"), 5);

        let mut tx = store.begin().await.unwrap();
        tx.save_inventory(&inventory).await.unwrap();
        inventory.reserve(2);
        tx.save_inventory(&inventory).await.unwrap();
        let seen = tx.inventory(&ProductId::new("p1")).await.unwrap().unwrap();
        assert_eq!(seen.reserved_quantity, 2);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn transactions_on_different_sagas_do_not_block_each_other() {
        let store = InMemoryStore::new();
        let first = saga();
        let second = saga();

        let mut tx1 = store.begin().await.unwrap();
        tx1.save_saga(&first).await.unwrap();

        let mut tx2 = store.begin().await.unwrap();
        tx2.save_saga(&second).await.unwrap();
        tx2.commit().await.unwrap();
        assert!(store.get_saga(second.saga_id).await.unwrap().is_some());
        assert!(store.get_saga(first.saga_id).await.unwrap().is_none());

        tx1.commit().await.unwrap();
        assert!(store.get_saga(first.saga_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn same_saga_waits_for_the_holding_transaction() {
        let store = InMemoryStore::new();
        let saga = saga();

        let mut tx = store.begin().await.unwrap();
        tx.save_saga(&saga).await.unwrap();

        let contender = {
            let store = store.clone();
            let saga_id = saga.saga_id;
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                let seen = tx.saga(saga_id).await.unwrap();
                tx.rollback().await.unwrap();
                seen
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        tx.commit().await.unwrap();
        assert_eq!(contender.await.unwrap(), Some(saga));
    }

    #[tokio::test]
    async fn pending_rows_are_returned_oldest_first_and_bounded() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for i in 0..5 {
            let record = OutboxRecord::new(
                "Order",
                format!("o-{i}"),
                MessageType::OrderCreated,
                serde_json::json!({ "n": i }),
                "saga-event-topic",
            );
            tx.insert_outbox(&record).await.unwrap();
        }
        tx.commit().await.unwrap();

        let batch = store.find_pending(3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|r| r.aggregate_id.as_str()).collect();
        assert_eq!(ids, vec!["o-0", "o-1", "o-2"]);
    }

    #[tokio::test]
    async fn failed_rows_can_be_requeued() {
        let store = InMemoryStore::new();
        let record = OutboxRecord::new(
            "Order",
            "o-1",
            MessageType::OrderCreated,
            serde_json::json!({}),
            "saga-event-topic",
        );
        let mut tx = store.begin().await.unwrap();
        tx.insert_outbox(&record).await.unwrap();
        tx.commit().await.unwrap();

        assert!(!store.requeue(record.id).await.unwrap());
        store.mark_failed(record.id).await.unwrap();
        assert_eq!(store.count_by_status(OutboxStatus::Failed).await.unwrap(), 1);

        assert!(store.requeue(record.id).await.unwrap());
        let requeued = store.get_outbox(record.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, OutboxStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
    }

    #[tokio::test]
    async fn marking_unknown_row_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.mark_sent(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn failed_messages_filter_by_status_and_topic() {
        let store = InMemoryStore::new();
        let a = FailedMessage::new("product-topic", 0, 1, None, "", None);
        let b = FailedMessage::new("saga-command-topic", 0, 2, None, "{}", None);
        store.save_failed_message(&a).await.unwrap();
        store.save_failed_message(&b).await.unwrap();

        let product = store
            .find_failed_messages(None, Some("product-topic"))
            .await
            .unwrap();
        assert_eq!(product, vec![a.clone()]);

        let updated = store
            .update_failed_message_status(a.id, FailedMessageStatus::Resolved)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.resolved_at.is_some());

        let pending = store
            .find_failed_messages(Some(FailedMessageStatus::Pending), None)
            .await
            .unwrap();
        assert_eq!(pending, vec![b]);
        assert!(
            store
                .update_failed_message_status(Uuid::new_v4(), FailedMessageStatus::Ignored)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_sagas_filters_by_status() {
        let store = InMemoryStore::new();
        let pending = saga();
        let mut done = saga();
        done.mark_completed().unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.save_saga(&pending).await.unwrap();
        tx.save_saga(&done).await.unwrap();
        tx.commit().await.unwrap();

        let completed = store.list_sagas(Some(SagaStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].saga_id, done.saga_id);
        assert_eq!(store.list_sagas(None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .find_saga_by_order(pending.order_id)
                .await
                .unwrap()
                .map(|s| s.saga_id),
            Some(pending.saga_id)
        );
    }
}
